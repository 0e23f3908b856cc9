use crate::types::{ButtonAction, ClimateCommand, ClimateSnapshot, HvacMode};

#[derive(Debug, Clone, Copy, Default)]
pub struct InterpretOptions {
    /// Step the fan mode with plus/minus while in fan-only or cool mode.
    pub fan_buttons: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Command(ClimateCommand),
    /// The climate target is absent or unavailable.
    Unavailable,
    /// The toggle target mode is not offered by the entity.
    Unsupported(HvacMode),
    /// The action has no meaning in the current mode.
    NotApplicable(HvacMode),
}

impl Outcome {
    pub fn into_command(self) -> Option<ClimateCommand> {
        match self {
            Self::Command(command) => Some(command),
            _ => None,
        }
    }
}

/// Maps a button press onto a climate command for the bound target.
pub fn handle(action: ButtonAction, snapshot: Option<&ClimateSnapshot>) -> Option<ClimateCommand> {
    interpret(action, snapshot, InterpretOptions::default()).into_command()
}

pub fn interpret(
    action: ButtonAction,
    snapshot: Option<&ClimateSnapshot>,
    options: InterpretOptions,
) -> Outcome {
    let Some(snapshot) = snapshot else {
        return Outcome::Unavailable;
    };

    match action {
        ButtonAction::Toggle => toggle(snapshot),
        ButtonAction::Plus => step(snapshot, true, options),
        ButtonAction::Minus => step(snapshot, false, options),
    }
}

fn toggle(snapshot: &ClimateSnapshot) -> Outcome {
    let target = if snapshot.mode == HvacMode::Heat {
        HvacMode::Off
    } else {
        HvacMode::Heat
    };

    if !snapshot.supports(&target) {
        return Outcome::Unsupported(target);
    }

    Outcome::Command(ClimateCommand::set_mode(&snapshot.entity_id, target))
}

fn step(snapshot: &ClimateSnapshot, up: bool, options: InterpretOptions) -> Outcome {
    match snapshot.mode {
        HvacMode::Heat => {
            let current = snapshot
                .target_temperature
                .unwrap_or(crate::types::DEFAULT_TARGET_TEMP);
            let next = if up {
                (current + snapshot.step).min(snapshot.max_temp)
            } else {
                (current - snapshot.step).max(snapshot.min_temp)
            };
            Outcome::Command(ClimateCommand::set_temperature(
                &snapshot.entity_id,
                next,
            ))
        }
        HvacMode::FanOnly | HvacMode::Cool if options.fan_buttons => {
            match next_fan_mode(snapshot, up) {
                Some(fan_mode) => Outcome::Command(ClimateCommand::set_fan_mode(
                    &snapshot.entity_id,
                    fan_mode,
                )),
                None => Outcome::NotApplicable(snapshot.mode.clone()),
            }
        }
        _ => Outcome::NotApplicable(snapshot.mode.clone()),
    }
}

fn next_fan_mode(snapshot: &ClimateSnapshot, up: bool) -> Option<String> {
    let current = snapshot.fan_mode.as_deref()?;
    let modes = &snapshot.fan_modes;
    if modes.is_empty() {
        return None;
    }

    if let Ok(speed) = current.parse::<u8>() {
        let next = if up {
            speed.saturating_add(1).min(9)
        } else {
            speed.saturating_sub(1).max(1)
        }
        .to_string();
        return (next != current && modes.contains(&next)).then_some(next);
    }

    let index = modes.iter().position(|mode| mode == current)?;
    let next = if up {
        modes.get(index + 1)
    } else {
        index.checked_sub(1).and_then(|previous| modes.get(previous))
    };
    next.cloned()
}
