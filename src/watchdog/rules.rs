//! Popup classification and the ordered rule list.
//!
//! Rules are evaluated in order and the first rule whose predicate matches
//! decides, even when it decides to do nothing. A restart prompt without a
//! decline button is therefore left alone rather than falling through to the
//! generic accept rule.

use crate::desktop::{Control, ControlKind, DIALOG_CLASS, WindowHandle, WindowInfo};

/// Message words that mark a restart prompt
pub const RESTART_WORDS: [&str; 2] = ["restart", "reboot"];

/// Captions that decline a restart
pub const DECLINE_CAPTIONS: [&str; 3] = ["No", "Cancel", "Abort"];

/// Captions that move an installer forward
pub const ACCEPT_CAPTIONS: [&str; 8] = [
    "OK",
    "Yes",
    "Next",
    "Run",
    "Continue",
    "Uninstall",
    "Close",
    "Finish",
];

/// Qt top-level frames register classes like `Qt5QWindowIcon` or `Qt6152QWindowIcon`
pub fn is_toolkit_frame(class_name: &str) -> bool {
    class_name.starts_with("Qt") && class_name.ends_with("QWindowIcon")
}

/// Strip mnemonic markers and decoration from a button caption.
///
/// `"&Next >"` becomes `"Next"`, `"Save && Exit"` keeps its literal ampersand.
pub fn normalize_caption(caption: &str) -> String {
    let mut out = String::with_capacity(caption.len());
    let mut chars = caption.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '&' {
            if chars.peek() == Some(&'&') {
                out.push('&');
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out.trim()
        .trim_end_matches("...")
        .trim_end_matches('…')
        .trim_matches(|c: char| c == '<' || c == '>' || c.is_whitespace())
        .to_string()
}

/// A button as seen by the rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonView {
    pub handle: WindowHandle,
    /// Normalized caption
    pub caption: String,
}

/// A window the watchdog knows how to handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popup {
    /// Standard modal dialog with introspectable children
    Dialog {
        handle: WindowHandle,
        title: String,
        /// Lower-cased concatenation of the label texts
        message: String,
        buttons: Vec<ButtonView>,
    },
    /// Toolkit frame without child-control introspection
    ToolkitFrame { handle: WindowHandle, title: String },
}

/// What the watchdog needs to know about a window before reading its children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupKind {
    Dialog,
    ToolkitFrame,
}

impl PopupKind {
    pub fn of(info: &WindowInfo) -> Option<Self> {
        if !info.visible {
            None
        } else if info.class_name == DIALOG_CLASS {
            Some(PopupKind::Dialog)
        } else if is_toolkit_frame(&info.class_name) {
            Some(PopupKind::ToolkitFrame)
        } else {
            None
        }
    }
}

impl Popup {
    /// Build a dialog view from its child controls
    pub fn dialog(info: &WindowInfo, controls: &[Control]) -> Self {
        let message = controls
            .iter()
            .filter(|c| c.kind == ControlKind::Label)
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let buttons = controls
            .iter()
            .filter(|c| c.kind == ControlKind::Button)
            .map(|c| ButtonView {
                handle: c.handle,
                caption: normalize_caption(&c.text),
            })
            .collect();
        Popup::Dialog {
            handle: info.handle,
            title: info.title.clone(),
            message,
            buttons,
        }
    }

    pub fn toolkit_frame(info: &WindowInfo) -> Self {
        Popup::ToolkitFrame {
            handle: info.handle,
            title: info.title.clone(),
        }
    }

    pub fn handle(&self) -> WindowHandle {
        match self {
            Popup::Dialog { handle, .. } | Popup::ToolkitFrame { handle, .. } => *handle,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Popup::Dialog { title, .. } | Popup::ToolkitFrame { title, .. } => title,
        }
    }
}

/// Action chosen for a popup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupAction {
    /// Press a button
    Click { button: WindowHandle, caption: String },
    /// Foreground the window, press Enter, pause, press Tab
    AcceptAndAdvance { window: WindowHandle },
}

/// Outcome of evaluating the rule list against one popup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Name of the rule that matched
    pub rule: &'static str,
    /// `None` when the matching rule chose to leave the window alone
    pub action: Option<PopupAction>,
}

/// A (predicate, action) pair
#[derive(Debug, Clone, Copy)]
pub struct PopupRule {
    pub name: &'static str,
    pub matches: fn(&Popup) -> bool,
    pub decide: fn(&Popup) -> Option<PopupAction>,
}

fn first_button_in(buttons: &[ButtonView], allowed: &[&str]) -> Option<PopupAction> {
    buttons
        .iter()
        .find(|b| allowed.iter().any(|a| b.caption.eq_ignore_ascii_case(a)))
        .map(|b| PopupAction::Click {
            button: b.handle,
            caption: b.caption.clone(),
        })
}

fn is_restart_prompt(popup: &Popup) -> bool {
    match popup {
        Popup::Dialog { message, .. } => RESTART_WORDS.iter().any(|w| message.contains(w)),
        Popup::ToolkitFrame { .. } => false,
    }
}

fn decline_restart(popup: &Popup) -> Option<PopupAction> {
    match popup {
        Popup::Dialog { buttons, .. } => first_button_in(buttons, &DECLINE_CAPTIONS),
        Popup::ToolkitFrame { .. } => None,
    }
}

fn is_dialog(popup: &Popup) -> bool {
    matches!(popup, Popup::Dialog { .. })
}

fn accept_dialog(popup: &Popup) -> Option<PopupAction> {
    match popup {
        Popup::Dialog { buttons, .. } => first_button_in(buttons, &ACCEPT_CAPTIONS),
        Popup::ToolkitFrame { .. } => None,
    }
}

fn is_toolkit(popup: &Popup) -> bool {
    matches!(popup, Popup::ToolkitFrame { .. })
}

fn accept_and_advance(popup: &Popup) -> Option<PopupAction> {
    Some(PopupAction::AcceptAndAdvance {
        window: popup.handle(),
    })
}

/// Ordered rule list
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<PopupRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<PopupRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PopupRule] {
        &self.rules
    }

    /// First matching rule's decision, or `None` when no rule applies
    pub fn evaluate(&self, popup: &Popup) -> Option<Decision> {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(popup))
            .map(|rule| Decision {
                rule: rule.name,
                action: (rule.decide)(popup),
            })
    }
}

impl Default for RuleSet {
    /// Never allow a restart, then accept dialogs, then nudge toolkit frames
    fn default() -> Self {
        Self::new(vec![
            PopupRule {
                name: "decline-restart",
                matches: is_restart_prompt,
                decide: decline_restart,
            },
            PopupRule {
                name: "accept-dialog",
                matches: is_dialog,
                decide: accept_dialog,
            },
            PopupRule {
                name: "toolkit-accept-advance",
                matches: is_toolkit,
                decide: accept_and_advance,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dialog(message: &str, captions: &[&str]) -> Popup {
        Popup::Dialog {
            handle: WindowHandle(1),
            title: "Setup".to_string(),
            message: message.to_string(),
            buttons: captions
                .iter()
                .enumerate()
                .map(|(i, c)| ButtonView {
                    handle: WindowHandle(100 + i as u64),
                    caption: normalize_caption(c),
                })
                .collect(),
        }
    }

    fn clicked(decision: Option<Decision>) -> Option<String> {
        match decision?.action? {
            PopupAction::Click { caption, .. } => Some(caption),
            PopupAction::AcceptAndAdvance { .. } => None,
        }
    }

    #[test]
    fn test_restart_prompt_clicks_cancel_not_restart() {
        let rules = RuleSet::default();
        let popup = dialog("installer needs to restart the computer", &["Cancel", "Restart"]);
        let decision = rules.evaluate(&popup).unwrap();
        assert_eq!(decision.rule, "decline-restart");
        assert_eq!(clicked(Some(decision)), Some("Cancel".to_string()));
    }

    #[test]
    fn test_reboot_prompt_prefers_decline_over_ok() {
        let rules = RuleSet::default();
        let popup = dialog("a reboot is required", &["OK", "&No"]);
        assert_eq!(clicked(rules.evaluate(&popup)), Some("No".to_string()));
    }

    #[test]
    fn test_restart_prompt_without_decline_does_nothing() {
        let rules = RuleSet::default();
        let popup = dialog("restart now?", &["Yes", "Restart"]);
        let decision = rules.evaluate(&popup).unwrap();
        assert_eq!(decision.rule, "decline-restart");
        assert_eq!(decision.action, None);
    }

    #[test]
    fn test_plain_dialog_clicks_next() {
        let rules = RuleSet::default();
        let popup = dialog("welcome to the setup wizard", &["&Next >", "Cancel"]);
        let decision = rules.evaluate(&popup).unwrap();
        assert_eq!(decision.rule, "accept-dialog");
        assert_eq!(clicked(Some(decision)), Some("Next".to_string()));
    }

    #[test]
    fn test_first_allowed_button_in_dialog_order_wins() {
        let rules = RuleSet::default();
        let popup = dialog("done", &["Back", "Finish", "OK"]);
        assert_eq!(clicked(rules.evaluate(&popup)), Some("Finish".to_string()));
    }

    #[test]
    fn test_no_allowed_caption_takes_no_action() {
        let rules = RuleSet::default();
        let popup = dialog("choose a folder", &["Browse...", "Cancel"]);
        assert_eq!(rules.evaluate(&popup).unwrap().action, None);
    }

    #[test]
    fn test_toolkit_frame_accepts_and_advances() {
        let rules = RuleSet::default();
        let popup = Popup::ToolkitFrame {
            handle: WindowHandle(7),
            title: "Maintenance Tool".to_string(),
        };
        let decision = rules.evaluate(&popup).unwrap();
        assert_eq!(decision.rule, "toolkit-accept-advance");
        assert_eq!(
            decision.action,
            Some(PopupAction::AcceptAndAdvance {
                window: WindowHandle(7)
            })
        );
    }

    #[test]
    fn test_normalize_caption() {
        assert_eq!(normalize_caption("&OK"), "OK");
        assert_eq!(normalize_caption("  &Next > "), "Next");
        assert_eq!(normalize_caption("< &Back"), "Back");
        assert_eq!(normalize_caption("Run..."), "Run");
        assert_eq!(normalize_caption("Save && Exit"), "Save & Exit");
    }

    #[test]
    fn test_popup_kind() {
        let info = |class: &str, visible| WindowInfo {
            handle: WindowHandle(1),
            class_name: class.to_string(),
            title: String::new(),
            visible,
        };
        assert_eq!(PopupKind::of(&info("#32770", true)), Some(PopupKind::Dialog));
        assert_eq!(
            PopupKind::of(&info("Qt5152QWindowIcon", true)),
            Some(PopupKind::ToolkitFrame)
        );
        assert_eq!(PopupKind::of(&info("#32770", false)), None);
        assert_eq!(PopupKind::of(&info("Notepad", true)), None);
    }

    #[test]
    fn test_dialog_view_joins_labels_lowercase() {
        let info = WindowInfo {
            handle: WindowHandle(1),
            class_name: DIALOG_CLASS.to_string(),
            title: "Setup".to_string(),
            visible: true,
        };
        let controls = vec![
            Control {
                handle: WindowHandle(2),
                kind: ControlKind::Label,
                text: "Setup must".to_string(),
            },
            Control {
                handle: WindowHandle(3),
                kind: ControlKind::Label,
                text: "REBOOT".to_string(),
            },
            Control {
                handle: WindowHandle(4),
                kind: ControlKind::Button,
                text: "&Cancel".to_string(),
            },
        ];
        match Popup::dialog(&info, &controls) {
            Popup::Dialog {
                message, buttons, ..
            } => {
                assert_eq!(message, "setup must reboot");
                assert_eq!(buttons.len(), 1);
                assert_eq!(buttons[0].caption, "Cancel");
            }
            other => panic!("unexpected popup {other:?}"),
        }
    }
}
