//! # Keyboard Teleoperation
//!
//! Maps decoded key presses to velocity setpoints and motor enable/disable
//! requests. Reading keys from a terminal is left to the caller.
//!
//! ## Key bindings
//!
//! | Key        | Action                                   |
//! |------------|------------------------------------------|
//! | Up / Down  | Step linear velocity by `linear_vel_step` |
//! | Left/Right | Step angular velocity by `angular_vel_step` |
//! | Space      | Zero both velocities                     |
//! | `e`        | Enable motors, zero command, reset odometry |
//! | `d`        | Disable motors, zero command             |
//! | `q`        | Quit                                     |
//!
//! Velocity keys are ignored while the motors are disabled.

use tracing::{info, warn};

use crate::config::TeleopConfig;
use crate::protocol::encoder::VelocityCommand;

/// Keys understood by [`KeyOp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Space,
    Enable,
    Disable,
    Quit,
}

impl Key {
    /// Map a printable key; arrows are decoded by the caller
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(Key::Space),
            'e' => Some(Key::Enable),
            'd' => Some(Key::Disable),
            'q' => Some(Key::Quit),
            _ => None,
        }
    }
}

/// What the caller should do after a key press
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    /// Send this setpoint
    Command(VelocityCommand),

    /// Enable motors, reset odometry, send a zero setpoint
    Enable,

    /// Disable motors; the setpoint is already zero
    Disable,

    Quit,

    /// Key had no effect
    Ignored,
}

/// Teleop state: current setpoint and motor power
#[derive(Debug, Clone)]
pub struct KeyOp {
    config: TeleopConfig,
    command: VelocityCommand,
    enabled: bool,
}

impl KeyOp {
    pub fn new(config: TeleopConfig) -> Self {
        Self {
            config,
            command: VelocityCommand::stop(),
            enabled: false,
        }
    }

    pub fn process(&mut self, key: Key) -> KeyAction {
        match key {
            Key::Enable => {
                self.command = VelocityCommand::stop();
                if self.enabled {
                    info!("Resetting command and odometry");
                } else {
                    info!("Enabling motors and resetting odometry");
                }
                self.enabled = true;
                KeyAction::Enable
            }
            Key::Disable => {
                self.command = VelocityCommand::stop();
                if self.enabled {
                    info!("Disabling motors");
                } else {
                    warn!("Motors are already disabled");
                }
                self.enabled = false;
                KeyAction::Disable
            }
            Key::Quit => KeyAction::Quit,
            _ if !self.enabled => {
                warn!("Motors are not enabled, press 'e' first");
                KeyAction::Ignored
            }
            Key::Up => self.step_linear(self.config.linear_vel_step),
            Key::Down => self.step_linear(-self.config.linear_vel_step),
            Key::Left => self.step_angular(self.config.angular_vel_step),
            Key::Right => self.step_angular(-self.config.angular_vel_step),
            Key::Space => {
                self.command = VelocityCommand::stop();
                info!("Velocities reset");
                KeyAction::Command(self.command)
            }
        }
    }

    fn step_linear(&mut self, step: f64) -> KeyAction {
        let max = self.config.linear_vel_max;
        self.command.linear_v = (self.command.linear_v + step).clamp(-max, max);
        info!("Velocity [{:.2} | {:.2}]", self.command.linear_v, self.command.angular_w);
        KeyAction::Command(self.command)
    }

    fn step_angular(&mut self, step: f64) -> KeyAction {
        let max = self.config.angular_vel_max;
        self.command.angular_w = (self.command.angular_w + step).clamp(-max, max);
        info!("Velocity [{:.2} | {:.2}]", self.command.linear_v, self.command.angular_w);
        KeyAction::Command(self.command)
    }

    pub fn command(&self) -> VelocityCommand {
        self.command
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
