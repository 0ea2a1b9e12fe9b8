/*!
Subject enum for `list`: which level of the category / group / command tree
to enumerate.
*/

use std::fmt;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Subject {
    /// Category names
    Categories,
    /// `category/group` pairs
    Groups,
    /// Every command with its kind
    #[default]
    Commands,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Categories => "categories",
            Subject::Groups => "groups",
            Subject::Commands => "commands",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
