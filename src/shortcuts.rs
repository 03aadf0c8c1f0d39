use eframe::egui::{Key, Modifiers};

use crate::layout::BroadcastAction;
use crate::tools::ToolId;

#[derive(Debug, Clone, PartialEq)]
pub enum ShortcutCommand {
    /// Applies to the focused pane only.
    ActivateTool(ToolId),
    /// Applies to every ready pane.
    Broadcast(BroadcastAction),
    /// Exports the focused pane.
    ExportSnapshot,
}

/// Maps a key press to its command. Alt, Ctrl and Cmd suppress everything except
/// the Ctrl combinations (rotate, export); Shift never suppresses.
pub fn shortcut_for(key: Key, modifiers: Modifiers) -> Option<ShortcutCommand> {
    if modifiers.alt {
        return None;
    }
    if modifiers.ctrl || modifiers.command || modifiers.mac_cmd {
        return match key {
            Key::R => Some(ShortcutCommand::Broadcast(BroadcastAction::Rotate(90))),
            Key::S => Some(ShortcutCommand::ExportSnapshot),
            _ => None,
        };
    }

    let command = match key {
        Key::Z => ShortcutCommand::ActivateTool(ToolId::Zoom),
        Key::P => ShortcutCommand::ActivateTool(ToolId::Pan),
        Key::W => ShortcutCommand::ActivateTool(ToolId::WindowLevel),
        Key::S => ShortcutCommand::ActivateTool(ToolId::StackScroll),
        Key::L => ShortcutCommand::ActivateTool(ToolId::Length),
        Key::A => ShortcutCommand::ActivateTool(ToolId::Angle),
        Key::R => ShortcutCommand::ActivateTool(ToolId::RectangleRoi),
        Key::E => ShortcutCommand::ActivateTool(ToolId::EllipticalRoi),
        Key::B => ShortcutCommand::ActivateTool(ToolId::Probe),
        Key::I => ShortcutCommand::Broadcast(BroadcastAction::Invert),
        Key::H => ShortcutCommand::Broadcast(BroadcastAction::FlipHorizontal),
        Key::V => ShortcutCommand::Broadcast(BroadcastAction::FlipVertical),
        Key::F => ShortcutCommand::Broadcast(BroadcastAction::FitToWindow),
        Key::O => ShortcutCommand::Broadcast(BroadcastAction::ToggleOverlays),
        Key::Escape => ShortcutCommand::Broadcast(BroadcastAction::Reset),
        _ => return None,
    };
    Some(command)
}

/// Key hint shown next to a tool in the toolbar.
pub fn tool_key_hint(tool: ToolId) -> &'static str {
    match tool {
        ToolId::Zoom => "Z",
        ToolId::Pan => "P",
        ToolId::WindowLevel => "W",
        ToolId::StackScroll => "S",
        ToolId::Length => "L",
        ToolId::Angle => "A",
        ToolId::RectangleRoi => "R",
        ToolId::EllipticalRoi => "E",
        ToolId::Probe => "B",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_a_key() {
        for tool in ToolId::ALL {
            let key = Key::from_name(tool_key_hint(tool)).expect("hint is a key name");
            assert_eq!(
                shortcut_for(key, Modifiers::NONE),
                Some(ShortcutCommand::ActivateTool(tool))
            );
        }
    }

    #[test]
    fn plain_keys_broadcast_view_operations() {
        assert_eq!(
            shortcut_for(Key::I, Modifiers::NONE),
            Some(ShortcutCommand::Broadcast(BroadcastAction::Invert))
        );
        assert_eq!(
            shortcut_for(Key::Escape, Modifiers::NONE),
            Some(ShortcutCommand::Broadcast(BroadcastAction::Reset))
        );
        assert_eq!(shortcut_for(Key::Q, Modifiers::NONE), None);
    }

    #[test]
    fn ctrl_combinations_rotate_and_export() {
        assert_eq!(
            shortcut_for(Key::R, Modifiers::CTRL),
            Some(ShortcutCommand::Broadcast(BroadcastAction::Rotate(90)))
        );
        assert_eq!(
            shortcut_for(Key::S, Modifiers::COMMAND),
            Some(ShortcutCommand::ExportSnapshot)
        );
    }

    #[test]
    fn modifiers_suppress_plain_bindings() {
        assert_eq!(shortcut_for(Key::Z, Modifiers::CTRL), None);
        assert_eq!(shortcut_for(Key::I, Modifiers::ALT), None);
        assert_eq!(shortcut_for(Key::R, Modifiers::CTRL | Modifiers::ALT), None);
        assert_eq!(shortcut_for(Key::H, Modifiers::MAC_CMD), None);
        assert_eq!(
            shortcut_for(Key::H, Modifiers::SHIFT),
            Some(ShortcutCommand::Broadcast(BroadcastAction::FlipHorizontal))
        );
    }
}
