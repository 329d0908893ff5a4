use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// One of the two external executables managed by the control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Server, Role::Client];

    /// Program name without any platform suffix: `frps` or `frpc`.
    pub fn program(self) -> &'static str {
        match self {
            Self::Server => "frps",
            Self::Client => "frpc",
        }
    }

    pub fn binary_name(self) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.exe", self.program())
        } else {
            self.program().to_string()
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Server => 0,
            Self::Client => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role '{0}', expected server/frps or client/frpc")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "server" | "frps" => Ok(Self::Server),
            "client" | "frpc" => Ok(Self::Client),
            _ => Err(UnknownRole(value.to_string())),
        }
    }
}
