//! Typed stage I/O (spec §9 "Dynamic type checking of stage signatures").
//!
//! Replaces reflection-based type checking with an explicit opaque tag per
//! value shape. `StageType` is compared at registration and validation
//! time; `PipelineValue` is the sum type that actually flows between
//! stages at runtime, and each stage's pattern-match on its input variant
//! is one-to-one with its registered `StageType`.

use std::path::PathBuf;

/// Opaque tag identifying the shape of a value flowing between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageType {
    Unit,
    OptionalPath,
    OptionalString,
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageType::Unit => "Unit",
            StageType::OptionalPath => "OptionalPath",
            StageType::OptionalString => "OptionalString",
        };
        f.write_str(s)
    }
}

/// The value that flows between stages. Its variants are exactly the
/// shapes named by `StageType`; a stage registered with a given
/// `StageType` may only be constructed from / may only return the
/// matching variant, which the registry enforces at validation time.
#[derive(Debug, Clone)]
pub enum PipelineValue {
    Unit,
    OptionalPath(Option<PathBuf>),
    OptionalString(Option<String>),
}

impl PipelineValue {
    pub fn stage_type(&self) -> StageType {
        match self {
            PipelineValue::Unit => StageType::Unit,
            PipelineValue::OptionalPath(_) => StageType::OptionalPath,
            PipelineValue::OptionalString(_) => StageType::OptionalString,
        }
    }

    pub fn as_optional_path(&self) -> Option<&PathBuf> {
        match self {
            PipelineValue::OptionalPath(p) => p.as_ref(),
            _ => None,
        }
    }

    pub fn as_optional_string(&self) -> Option<&str> {
        match self {
            PipelineValue::OptionalString(s) => s.as_deref(),
            _ => None,
        }
    }

    pub fn into_optional_string(self) -> Option<String> {
        match self {
            PipelineValue::OptionalString(s) => s,
            _ => None,
        }
    }

    pub fn into_optional_path(self) -> Option<PathBuf> {
        match self {
            PipelineValue::OptionalPath(p) => p,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_type_matches_variant() {
        assert_eq!(PipelineValue::Unit.stage_type(), StageType::Unit);
        assert_eq!(
            PipelineValue::OptionalPath(None).stage_type(),
            StageType::OptionalPath
        );
        assert_eq!(
            PipelineValue::OptionalString(Some("hi".into())).stage_type(),
            StageType::OptionalString
        );
    }
}
