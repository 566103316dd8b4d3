/// Transaction state of one cached session
///
/// ```text
/// Idle ──begin──> Active(1) ──savepoint──> Active(2) ──...──> Active(n)
///   ^                 │                        │
///   └──commit/abort───┴────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactState {
    /// No remote transaction is open
    Idle,

    /// Remote transaction open at the given nesting level
    Active(u32),
}

impl XactState {
    pub fn from_level(level: u32) -> Self {
        if level == 0 {
            XactState::Idle
        } else {
            XactState::Active(level)
        }
    }

    pub fn level(&self) -> u32 {
        match self {
            XactState::Idle => 0,
            XactState::Active(level) => *level,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, XactState::Active(_))
    }
}

impl std::fmt::Display for XactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XactState::Idle => write!(f, "IDLE"),
            XactState::Active(level) => write!(f, "ACTIVE({})", level),
        }
    }
}

/// Name of the savepoint standing for nesting level `level`
pub fn savepoint_name(level: u32) -> String {
    format!("s{}", level)
}
