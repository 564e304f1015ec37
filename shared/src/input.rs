//! Edge-preserving input capture.
//!
//! Physical key events may arrive faster than the simulation polls. Each
//! control keeps a small automaton so that a press and a release landing
//! between two polls still produce both edges on the next tick.

use crate::protocol::input_bits;

/// Logical controls captured for recording and network submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Left = 0,
    Right = 1,
    Up = 2,
    Down = 3,
}

impl Control {
    pub const ALL: [Control; 4] = [Control::Left, Control::Right, Control::Up, Control::Down];

    fn play_bit(self) -> u8 {
        match self {
            Control::Left => input_bits::LEFT,
            Control::Right => input_bits::RIGHT,
            Control::Up => input_bits::UP,
            Control::Down => input_bits::DOWN,
        }
    }
}

/// Transitions seen since the last poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPhase {
    #[default]
    Idle,
    Down,
    Up,
    DownThenUp,
    UpThenDown,
}

/// What a control did during one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyTick {
    pub first_press: bool,
    pub held: bool,
    pub just_killed: bool,
}

impl KeyTick {
    fn bits(self) -> u16 {
        (self.first_press as u16) | (self.held as u16) << 1 | (self.just_killed as u16) << 2
    }

    fn from_bits(bits: u16) -> Self {
        Self {
            first_press: bits & 0b001 != 0,
            held: bits & 0b010 != 0,
            just_killed: bits & 0b100 != 0,
        }
    }
}

/// Per-control automaton. Lives for the whole session and is reset each poll.
#[derive(Debug, Clone, Default)]
pub struct KeyAutomaton {
    phase: KeyPhase,
    held: bool,
}

impl KeyAutomaton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> KeyPhase {
        self.phase
    }

    pub fn press(&mut self) {
        self.phase = match self.phase {
            KeyPhase::Idle | KeyPhase::Down => KeyPhase::Down,
            KeyPhase::Up => KeyPhase::UpThenDown,
            KeyPhase::DownThenUp => KeyPhase::Down,
            KeyPhase::UpThenDown => KeyPhase::UpThenDown,
        };
    }

    pub fn release(&mut self) {
        self.phase = match self.phase {
            KeyPhase::Idle | KeyPhase::Up => KeyPhase::Up,
            KeyPhase::Down => KeyPhase::DownThenUp,
            KeyPhase::DownThenUp => KeyPhase::DownThenUp,
            KeyPhase::UpThenDown => KeyPhase::DownThenUp,
        };
    }

    /// Reduces the pending transitions to one tick and returns to idle.
    pub fn poll(&mut self) -> KeyTick {
        let was_held = self.held;
        let tick = match self.phase {
            KeyPhase::Idle => KeyTick {
                first_press: false,
                held: was_held,
                just_killed: false,
            },
            KeyPhase::Down => KeyTick {
                first_press: !was_held,
                held: true,
                just_killed: false,
            },
            KeyPhase::Up => KeyTick {
                first_press: false,
                held: false,
                just_killed: was_held,
            },
            KeyPhase::DownThenUp => KeyTick {
                first_press: true,
                held: false,
                just_killed: true,
            },
            KeyPhase::UpThenDown => KeyTick {
                first_press: true,
                held: true,
                just_killed: true,
            },
        };
        self.held = tick.held;
        self.reset();
        tick
    }

    pub fn reset(&mut self) {
        self.phase = KeyPhase::Idle;
    }
}

/// One poll tick across all four directional controls, packed in 12 bits:
/// three bits per control (`first_press`, `held`, `just_killed`), left first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TickLine(u16);

impl TickLine {
    pub const BITS: u32 = 12;
    pub const MASK: u16 = (1 << Self::BITS) - 1;

    pub fn from_ticks(ticks: [KeyTick; 4]) -> Self {
        let mut line = 0u16;
        for (i, tick) in ticks.iter().enumerate() {
            line |= tick.bits() << (3 * i);
        }
        Self(line)
    }

    /// Rejects values with bits above the 12-bit line.
    pub fn from_raw(raw: u16) -> Option<Self> {
        (raw & !Self::MASK == 0).then_some(Self(raw))
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn tick(self, control: Control) -> KeyTick {
        KeyTick::from_bits(self.0 >> (3 * control as u16) & 0b111)
    }

    pub fn ticks(self) -> [KeyTick; 4] {
        Control::ALL.map(|control| self.tick(control))
    }

    /// Held controls as a `PLAY` input byte.
    pub fn play_mask(self) -> u8 {
        Control::ALL
            .iter()
            .filter(|control| self.tick(**control).held)
            .fold(0, |mask, control| mask | control.play_bit())
    }
}

/// Capture state for the four directional controls.
#[derive(Debug, Clone, Default)]
pub struct InputCapture {
    keys: [KeyAutomaton; 4],
}

impl InputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, control: Control) {
        self.keys[control as usize].press();
    }

    pub fn release(&mut self, control: Control) {
        self.keys[control as usize].release();
    }

    pub fn phase(&self, control: Control) -> KeyPhase {
        self.keys[control as usize].phase()
    }

    pub fn poll(&mut self) -> TickLine {
        let ticks = [
            self.keys[0].poll(),
            self.keys[1].poll(),
            self.keys[2].poll(),
            self.keys[3].poll(),
        ];
        TickLine::from_ticks(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_down_then_up_between_polls() {
        let mut capture = InputCapture::new();
        capture.press(Control::Left);
        capture.release(Control::Left);
        assert_eq!(capture.phase(Control::Left), KeyPhase::DownThenUp);

        let line = capture.poll();
        assert_eq!(
            line.tick(Control::Left),
            KeyTick {
                first_press: true,
                held: false,
                just_killed: true
            }
        );
        assert_eq!(capture.phase(Control::Left), KeyPhase::Idle);
    }

    #[test]
    fn test_hold_across_ticks() {
        let mut key = KeyAutomaton::new();
        key.press();
        let first = key.poll();
        assert!(first.first_press && first.held && !first.just_killed);

        let second = key.poll();
        assert!(!second.first_press && second.held && !second.just_killed);

        key.release();
        let third = key.poll();
        assert!(!third.first_press && !third.held && third.just_killed);

        let fourth = key.poll();
        assert_eq!(fourth, KeyTick::default());
    }

    #[test]
    fn test_up_then_down_while_held() {
        let mut key = KeyAutomaton::new();
        key.press();
        key.poll();
        key.release();
        key.press();
        assert_eq!(key.phase(), KeyPhase::UpThenDown);

        let tick = key.poll();
        assert!(tick.first_press && tick.held && tick.just_killed);
    }

    #[test]
    fn test_repeated_press_stays_down() {
        let mut key = KeyAutomaton::new();
        key.press();
        key.press();
        assert_eq!(key.phase(), KeyPhase::Down);
    }

    #[test]
    fn test_tick_line_packing() {
        let ticks = [
            KeyTick {
                first_press: true,
                held: true,
                just_killed: false,
            },
            KeyTick::default(),
            KeyTick {
                first_press: false,
                held: false,
                just_killed: true,
            },
            KeyTick {
                first_press: false,
                held: true,
                just_killed: false,
            },
        ];
        let line = TickLine::from_ticks(ticks);
        assert_eq!(line.raw(), 0b010_100_000_011);
        assert!(line.raw() <= TickLine::MASK);
        assert_eq!(line.ticks(), ticks);
        assert_eq!(line.play_mask(), input_bits::LEFT | input_bits::DOWN);
    }

    #[test]
    fn test_from_raw_rejects_high_bits() {
        assert!(TickLine::from_raw(0x0FFF).is_some());
        assert!(TickLine::from_raw(0x1000).is_none());
    }

    #[test]
    fn test_random_events_keep_edges_and_packing() {
        let mut rng = StdRng::seed_from_u64(0x1eaf);
        let mut capture = InputCapture::new();
        let mut held = [false; 4];

        for _ in 0..5_000 {
            // Events per control since the last poll, true for a press.
            let mut events: [Vec<bool>; 4] = Default::default();
            for _ in 0..rng.gen_range(0..6) {
                let control = Control::ALL[rng.gen_range(0..4)];
                let pressed = rng.gen_bool(0.5);
                if pressed {
                    capture.press(control);
                } else {
                    capture.release(control);
                }
                events[control as usize].push(pressed);
            }

            let line = capture.poll();
            assert_eq!(TickLine::from_raw(line.raw()), Some(line));
            assert_eq!(TickLine::from_ticks(line.ticks()), line);

            let mut mask = 0;
            for control in Control::ALL {
                let seen = &events[control as usize];
                let tick = line.tick(control);
                let expect_held = seen.last().copied().unwrap_or(held[control as usize]);
                assert_eq!(tick.held, expect_held, "{:?} after {:?}", control, seen);
                if tick.first_press {
                    assert!(seen.contains(&true));
                }
                if tick.just_killed {
                    assert!(seen.contains(&false));
                }
                if tick.held {
                    mask |= control.play_bit();
                }
                held[control as usize] = tick.held;
            }
            assert_eq!(line.play_mask(), mask);
        }
    }
}
