use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use rayon::prelude::*;

use crate::types::Frame;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    TogglePause,
    Exit,
    /// Any other key; while paused it steps to the next frame.
    Other,
}

impl KeyAction {
    fn from_key(key: Key) -> Self {
        match key {
            Key::P => KeyAction::TogglePause,
            Key::Escape => KeyAction::Exit,
            _ => KeyAction::Other,
        }
    }
}

/// Action for the keys pressed since the last poll. Pause and exit win over
/// other keys pressed at the same time.
fn pressed_action(keys: &[Key]) -> Option<KeyAction> {
    let mut actions = keys.iter().map(|&key| KeyAction::from_key(key));
    actions
        .clone()
        .find(|action| *action != KeyAction::Other)
        .or_else(|| actions.next())
}

/// Preview window with OpenCV-style `wait_key` polling.
pub struct PreviewWindow {
    window: Window,
    argb: Vec<u32>,
}

impl PreviewWindow {
    pub fn open(title: &str, width: u32, height: u32) -> Result<Self> {
        let window = Window::new(
            title,
            width as usize,
            height as usize,
            WindowOptions {
                resize: true,
                ..WindowOptions::default()
            },
        )
        .with_context(|| format!("failed to open preview window {title:?}"))?;
        Ok(Self {
            window,
            argb: Vec::new(),
        })
    }

    pub fn show(&mut self, frame: &Frame) -> Result<()> {
        rgb_to_argb(&frame.rgb, &mut self.argb);
        self.window
            .update_with_buffer(&self.argb, frame.width as usize, frame.height as usize)
            .context("failed to update preview window")
    }

    /// Pumps window events for `delay` (forever when zero) and returns the
    /// first pressed key. A closed window reports [`KeyAction::Exit`].
    pub fn wait_key(&mut self, delay: Duration) -> Option<KeyAction> {
        let deadline = (!delay.is_zero()).then(|| Instant::now() + delay);
        loop {
            if !self.window.is_open() {
                return Some(KeyAction::Exit);
            }
            let action = pressed_action(&self.window.get_keys_pressed(KeyRepeat::No));
            if action.is_some() {
                return action;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
            self.window.update();
        }
    }
}

fn rgb_to_argb(rgb: &[u8], argb: &mut Vec<u32>) {
    argb.resize(rgb.len() / 3, 0);
    argb.par_iter_mut()
        .zip(rgb.par_chunks_exact(3))
        .for_each(|(dst, px)| {
            *dst = 0xFF00_0000 | (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32;
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_rgb_into_argb() {
        let mut argb = Vec::new();
        rgb_to_argb(&[0x12, 0x34, 0x56, 0xFF, 0x00, 0x01], &mut argb);
        assert_eq!(argb, vec![0xFF12_3456, 0xFFFF_0001]);
    }

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(KeyAction::from_key(Key::P), KeyAction::TogglePause);
        assert_eq!(KeyAction::from_key(Key::Escape), KeyAction::Exit);
        assert_eq!(KeyAction::from_key(Key::Q), KeyAction::Other);
        assert_eq!(KeyAction::from_key(Key::Space), KeyAction::Other);
    }

    #[test]
    fn any_key_ends_the_wait() {
        assert_eq!(pressed_action(&[]), None);
        assert_eq!(pressed_action(&[Key::Space]), Some(KeyAction::Other));
        assert_eq!(
            pressed_action(&[Key::A, Key::Escape]),
            Some(KeyAction::Exit)
        );
        assert_eq!(
            pressed_action(&[Key::P, Key::Enter]),
            Some(KeyAction::TogglePause)
        );
    }
}
