mod audio_output;

pub use audio_output::AudioOutput;
