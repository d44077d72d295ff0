//! UI control handles toggled by the job controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// A button or selector with an enabled flag and a label.
///
/// UI layers poll these; only the controller changes them.
#[derive(Debug)]
pub struct Control {
    name: &'static str,
    default_label: &'static str,
    enabled: AtomicBool,
    label: Mutex<String>,
}

impl Control {
    fn new(name: &'static str, default_label: &'static str) -> Self {
        Self {
            name,
            default_label,
            enabled: AtomicBool::new(false),
            label: Mutex::new(default_label.to_string()),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_label(&self, label: impl Into<String>) {
        *self.label.lock().unwrap_or_else(PoisonError::into_inner) = label.into();
    }

    fn reset_label(&self) {
        self.set_label(self.default_label);
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// Every control able to start a job. All start disabled.
#[derive(Debug)]
pub struct Controls {
    pub style_button: Control,
    pub combine_button: Control,
    pub style_model_select: Control,
    pub transformer_model_select: Control,
    /// Held by the one running job, whichever control started it.
    busy: AtomicBool,
}

impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}

impl Controls {
    #[must_use]
    pub fn new() -> Self {
        Self {
            style_button: Control::new("style-button", "Stylize"),
            combine_button: Control::new("combine-button", "Combine Styles"),
            style_model_select: Control::new("style-model-select", "Style model"),
            transformer_model_select: Control::new(
                "transformer-model-select",
                "Transformer model",
            ),
            busy: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn all(&self) -> [&Control; 4] {
        [
            &self.style_button,
            &self.combine_button,
            &self.style_model_select,
            &self.transformer_model_select,
        ]
    }

    /// True when no job holds the controls.
    #[must_use]
    pub fn all_enabled(&self) -> bool {
        self.all().iter().all(|control| control.is_enabled())
    }

    pub(crate) fn enable_all(&self) {
        for control in self.all() {
            control.set_enabled(true);
        }
    }
}

/// Holds the controls disabled for the duration of one job.
///
/// Dropping the guard resets every label and re-enables every control,
/// whether the job finished or bailed out with `?`.
#[derive(Debug)]
pub(crate) struct RunGuard<'a> {
    controls: &'a Controls,
}

impl<'a> RunGuard<'a> {
    /// Take the busy flag for `trigger` and disable every control.
    ///
    /// Returns `None` if `trigger` is disabled or another job holds the flag,
    /// even one started from a different control on another thread.
    pub(crate) fn acquire(controls: &'a Controls, trigger: &Control) -> Option<Self> {
        if !trigger.is_enabled() {
            return None;
        }
        if controls
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        for control in controls.all() {
            control.set_enabled(false);
        }
        Some(Self { controls })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        for control in self.controls.all() {
            control.reset_label();
            control.set_enabled(true);
        }
        self.controls.busy.store(false, Ordering::SeqCst);
    }
}
