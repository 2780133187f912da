//! Consumer group id generation.

use std::str::FromStr;

use crate::error::BridgeError;

/// How to build a consumer group id when none is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupIdStrategy {
    /// `<host>_<topics>`: every instance on a host shares the group.
    HostTopicGroup,
    /// `<host>_<topics>_<pid>`: one group per process.
    #[default]
    UniqueGroup,
}

impl FromStr for GroupIdStrategy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "host-topic-group" => Ok(GroupIdStrategy::HostTopicGroup),
            "unique-group" => Ok(GroupIdStrategy::UniqueGroup),
            other => Err(BridgeError::config(format!(
                "unknown group.id.autogen strategy '{}'",
                other
            ))),
        }
    }
}

/// Build a group id. Topics are joined with `_`.
pub fn generate_group_id(
    strategy: GroupIdStrategy,
    host: &str,
    topics: &[String],
    pid: u32,
) -> String {
    let topics = topics.join("_");
    match strategy {
        GroupIdStrategy::HostTopicGroup => format!("{}_{}", host, topics),
        GroupIdStrategy::UniqueGroup => format!("{}_{}_{}", host, topics, pid),
    }
}

/// Name of the local host, `localhost` if it cannot be determined.
pub fn host_name() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            let name = name.to_string_lossy().into_owned();
            if !name.is_empty() {
                return name;
            }
        }
    }

    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
