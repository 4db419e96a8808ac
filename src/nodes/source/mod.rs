mod keyboard;
mod oscillator;
mod pattern_sequencer;
mod sequencer;

pub use keyboard::Keyboard;
pub use oscillator::Oscillator;
pub use pattern_sequencer::PatternSequencer;
pub use sequencer::{Sequencer, Transport};
