//! Configuration structures
//!
//! Every recognized option is spelled out with its default; nothing is
//! passed as an optional trailing argument.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-call flags: code-generation hints and validation-mode hints
///
/// Deserializes from the camelCase wire form, e.g.
/// `{"convertResourcesToId": true}`. Every flag defaults to `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Code-generation hint, carried through the invocation context
    pub wrap_variables: bool,
    /// Code-generation hint, carried through the invocation context
    pub template: bool,
    /// Render relationships (and resources standing in for them) as bare ids
    pub convert_resources_to_id: bool,
    /// Render resources standing in for relationships as `resource:` references
    pub convert_resources_to_relationships: bool,
    /// Keep resources standing in for relationships embedded on output
    pub permit_resources_for_relationships: bool,
    /// Accept an embedded resource where a relationship is declared
    pub accept_resources_for_relationships: bool,
}

impl Options {
    /// Validation mode for values entering the sandbox
    pub fn for_input(&self) -> Options {
        Options {
            accept_resources_for_relationships: true,
            permit_resources_for_relationships: !self.convert_resources_to_id
                && !self.convert_resources_to_relationships,
            ..self.clone()
        }
    }

    /// Validation mode for values leaving the sandbox
    pub fn for_output() -> Options {
        Options {
            accept_resources_for_relationships: true,
            convert_resources_to_relationships: true,
            ..Options::default()
        }
    }
}

/// Which sandbox variant an engine runs logic in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Worker thread, owned context copies, wall-clock budget
    #[default]
    Isolated,
    /// Caller's thread, no budget; only for already-trusted logic
    Direct,
}

impl SandboxMode {
    pub fn label(self) -> &'static str {
        match self {
            SandboxMode::Isolated => "isolated",
            SandboxMode::Direct => "direct",
        }
    }
}

impl std::str::FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(SandboxMode::Isolated),
            "direct" => Ok(SandboxMode::Direct),
            other => Err(format!("unknown sandbox mode '{}'", other)),
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sandbox: SandboxMode,
    /// Wall-clock budget per call, enforced by the isolated sandbox
    pub timeout_ms: u64,
    /// Deepest function-call nesting the evaluator allows
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sandbox: SandboxMode::Isolated,
            timeout_ms: 1000,
            max_call_depth: 64,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-call settings for trigger, invoke, init and calculate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallConfig {
    /// RFC 3339 timestamp for `now`; current time when absent
    pub now: Option<String>,
    /// Offset from UTC in minutes; taken from `now` when absent
    pub utc_offset: Option<i32>,
    /// Passed to the executed logic through the invocation context
    pub options: Options,
    /// Validation-mode hints applied to the contract data
    pub validate_options: Options,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_deserialize_camel_case_with_defaults() {
        let opts: Options = serde_json::from_str(r#"{"convertResourcesToId": true}"#).unwrap();
        assert!(opts.convert_resources_to_id);
        assert!(!opts.wrap_variables);
        assert!(!opts.accept_resources_for_relationships);
    }

    #[test]
    fn test_input_mode_keeps_embedded_resources_unless_converting() {
        let input = Options::default().for_input();
        assert!(input.accept_resources_for_relationships);
        assert!(input.permit_resources_for_relationships);

        let by_id = Options {
            convert_resources_to_id: true,
            ..Options::default()
        }
        .for_input();
        assert!(!by_id.permit_resources_for_relationships);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"sandbox": "direct"}"#).unwrap();
        assert_eq!(config.sandbox, SandboxMode::Direct);
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.max_call_depth, 64);
    }

    #[test]
    fn test_sandbox_mode_from_str() {
        assert_eq!("isolated".parse::<SandboxMode>(), Ok(SandboxMode::Isolated));
        assert!("chroot".parse::<SandboxMode>().is_err());
    }
}
