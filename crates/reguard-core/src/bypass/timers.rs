use tracing::info;

use crate::runtime::{SingletonLocator, TypeDatabase};

/// Boolean fields that stop a manager from updating once the checks trip.
pub const UPDATE_TIMER_FIELDS: [&str; 2] = ["UpdateTimerEnable", "LateUpdateTimerEnable"];

/// Clear the update timer flags on the named manager. Missing pieces (no
/// singleton outside gameplay, no type info, no field) are skipped quietly.
/// Returns how many flags were set before being cleared.
pub fn disable_update_timers<R>(runtime: &R, manager: &str) -> usize
where
    R: TypeDatabase + SingletonLocator + ?Sized,
{
    let Some(object) = runtime.managed_singleton(manager) else {
        return 0;
    };
    let Some(ty) = runtime.object_type(object) else {
        return 0;
    };

    let mut tripped = 0;
    for name in UPDATE_TIMER_FIELDS {
        let Some(field) = runtime.find_field(ty, name) else {
            continue;
        };

        let was_set = runtime
            .read_field(object, field, 1, true)
            .is_some_and(|v| v.first().is_some_and(|b| *b != 0));
        if was_set {
            info!("{}.{} was true, disabling it", manager, name);
            tripped += 1;
        }

        runtime.write_field(object, field, &[0], true);
    }

    tripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;

    #[test]
    fn test_disables_both_flags() {
        let runtime = FakeRuntime::default().with_manager(
            "app.InteractManager",
            0x5000,
            0x900,
            &[("UpdateTimerEnable", 1, true), ("LateUpdateTimerEnable", 2, false)],
        );

        assert_eq!(disable_update_timers(&runtime, "app.InteractManager"), 1);
        assert_eq!(runtime.value(0x5000, 1), Some(0));
        assert_eq!(runtime.value(0x5000, 2), Some(0));

        assert_eq!(disable_update_timers(&runtime, "app.InteractManager"), 0);
    }

    #[test]
    fn test_missing_manager_is_skipped() {
        let runtime = FakeRuntime::default();
        assert_eq!(disable_update_timers(&runtime, "app.FadeManager"), 0);
    }

    #[test]
    fn test_missing_type_is_skipped() {
        let mut runtime = FakeRuntime::default();
        runtime.singletons.insert("app.GUIManager".to_string(), 0x7000);
        assert_eq!(disable_update_timers(&runtime, "app.GUIManager"), 0);
    }
}
