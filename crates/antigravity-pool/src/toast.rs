//! Account-switch notification throttle

use std::time::Duration;

/// Window within which the same account's toast is not repeated.
pub const DEFAULT_TOAST_DEBOUNCE: Duration = Duration::from_secs(30);

/// Remembers the last account index a toast was shown for, and when.
#[derive(Debug, Default, Clone)]
pub struct ToastDebouncer {
    last_shown: Option<(usize, i64)>,
}

impl ToastDebouncer {
    /// False only when `index` was the last one shown, less than `window` ago.
    pub fn should_show(&self, index: usize, window: Duration, now: i64) -> bool {
        match self.last_shown {
            Some((last, at)) if last == index => now - at >= window.as_millis() as i64,
            _ => true,
        }
    }

    pub fn mark_shown(&mut self, index: usize, now: i64) {
        self.last_shown = Some((index, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_toast_is_shown() {
        let debouncer = ToastDebouncer::default();
        assert!(debouncer.should_show(0, DEFAULT_TOAST_DEBOUNCE, 0));
    }

    #[test]
    fn same_index_suppressed_within_window() {
        let mut debouncer = ToastDebouncer::default();
        debouncer.mark_shown(0, 1_000);
        assert!(!debouncer.should_show(0, DEFAULT_TOAST_DEBOUNCE, 1_000));
        assert!(!debouncer.should_show(0, DEFAULT_TOAST_DEBOUNCE, 30_999));
        assert!(debouncer.should_show(0, DEFAULT_TOAST_DEBOUNCE, 31_000));
    }

    #[test]
    fn other_index_shown_immediately() {
        let mut debouncer = ToastDebouncer::default();
        debouncer.mark_shown(0, 1_000);
        assert!(debouncer.should_show(1, DEFAULT_TOAST_DEBOUNCE, 1_000));
    }

    #[test]
    fn custom_window() {
        let mut debouncer = ToastDebouncer::default();
        debouncer.mark_shown(2, 0);
        assert!(!debouncer.should_show(2, Duration::from_secs(5), 4_999));
        assert!(debouncer.should_show(2, Duration::from_secs(5), 5_000));
    }
}
