// Ordered session membership. The first member is the host.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Members {
    list: Vec<String>,
}

impl Members {
    pub fn new(host: impl Into<String>) -> Self {
        Members {
            list: vec![host.into()],
        }
    }

    /// Append `participant` unless already present. Returns whether the list
    /// changed.
    pub fn join(&mut self, participant: &str) -> bool {
        if self.contains(participant) {
            return false;
        }
        self.list.push(participant.to_string());
        true
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.list.iter().any(|m| m == participant)
    }

    pub fn host(&self) -> &str {
        &self.list[0]
    }

    pub fn is_host(&self, participant: &str) -> bool {
        self.host() == participant
    }

    pub fn as_slice(&self) -> &[String] {
        &self.list
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.list.clone()
    }
}
