use modelget_core::core::events::StrategyKind;

use crate::core::dependencies::Capabilities;

/// Outcome of strategy selection for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Primary,
    Secondary,
    /// Nothing can fetch bytes; carries install guidance for the caller.
    Unavailable(String),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Primary => StrategyKind::Primary,
            Strategy::Secondary => StrategyKind::Secondary,
            Strategy::Unavailable(_) => StrategyKind::Undetermined,
        }
    }
}

/// Secondary wins only when explicitly preferred and fully available;
/// otherwise Primary, which must itself be usable.
pub fn select_strategy(prefer_secondary: bool, caps: &Capabilities) -> Strategy {
    if prefer_secondary && caps.helper_ready() {
        return Strategy::Secondary;
    }
    if caps.native {
        return Strategy::Primary;
    }
    Strategy::Unavailable(missing_message(prefer_secondary, caps))
}

fn missing_message(prefer_secondary: bool, caps: &Capabilities) -> String {
    let mut missing = Vec::new();
    if !caps.interpreter {
        missing.push("a Python 3 interpreter");
    }
    if !caps.library {
        missing.push("huggingface_hub (pip install huggingface_hub)");
    }
    let helper = if missing.is_empty() {
        "the helper toolchain is installed but not preferred".to_string()
    } else {
        format!("install {}", missing.join(" and "))
    };
    if prefer_secondary {
        format!("native fetcher is disabled and {}", helper)
    } else {
        format!(
            "native fetcher is disabled; enable it or {} and set prefer_external_helper",
            helper
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(native: bool, interpreter: bool, library: bool) -> Capabilities {
        Capabilities {
            native,
            interpreter,
            library,
            registry_cli: false,
        }
    }

    #[test]
    fn primary_is_default_even_with_helper_ready() {
        assert_eq!(select_strategy(false, &caps(true, true, true)), Strategy::Primary);
    }

    #[test]
    fn preference_selects_secondary_when_ready() {
        assert_eq!(select_strategy(true, &caps(true, true, true)), Strategy::Secondary);
    }

    #[test]
    fn preference_needs_both_interpreter_and_library() {
        assert_eq!(select_strategy(true, &caps(true, true, false)), Strategy::Primary);
        assert_eq!(select_strategy(true, &caps(true, false, true)), Strategy::Primary);
    }

    #[test]
    fn nothing_available_is_unavailable_with_guidance() {
        match select_strategy(false, &caps(false, false, false)) {
            Strategy::Unavailable(msg) => {
                assert!(msg.contains("huggingface_hub"));
                assert!(msg.contains("Python"));
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[test]
    fn no_silent_fallback_to_helper() {
        let selected = select_strategy(false, &caps(false, true, true));
        assert!(matches!(selected, Strategy::Unavailable(_)));
        assert_eq!(selected.kind(), StrategyKind::Undetermined);
    }
}
