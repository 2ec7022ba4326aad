//! Deployment stages and their fixed ordering.
//!
//! The deployment order is fixed: Token -> Governance -> Treasury.
//! Each stage's storage needs the address produced by the stage before it.

use serde::{Deserialize, Serialize};

/// A contract deployed by the pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// FA1.2 governance token.
    Token,
    /// DAO holding proposals and votes, bound to the token.
    Governance,
    /// Community fund controlled by the DAO.
    Treasury,
}

impl Stage {
    /// All stages in dependency order.
    pub const ALL: [Stage; 3] = [Stage::Token, Stage::Governance, Stage::Treasury];

    /// The first stage of every run.
    pub const fn first() -> Self {
        Stage::Token
    }

    /// The stage that follows this one, or `None` for the terminal stage.
    ///
    /// Valid transitions:
    /// - Token -> Governance
    /// - Governance -> Treasury
    pub const fn next(self) -> Option<Self> {
        match self {
            Stage::Token => Some(Stage::Governance),
            Stage::Governance => Some(Stage::Treasury),
            Stage::Treasury => None,
        }
    }

    /// The earlier stage whose address must be embedded in this stage's storage.
    pub const fn dependency(self) -> Option<Self> {
        match self {
            Stage::Token => None,
            Stage::Governance => Some(Stage::Token),
            Stage::Treasury => Some(Stage::Governance),
        }
    }
}
