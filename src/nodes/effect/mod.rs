mod gain;
mod group;
mod poly_converter;
mod poly_oscillator;
mod toggle;

pub use gain::Gain;
pub use group::Group;
pub use poly_converter::PolyphonicMidiConverter;
pub use poly_oscillator::PolyphonicOscillator;
pub use toggle::ToggleGain;
