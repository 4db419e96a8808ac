use tracing::warn;

use crate::signal::{Automation, ResourceId, ResourceKind, SignalContext};

const RAMP: f64 = 0.005;

/// Input gain feeding an output gain. Enabling and disabling ramps the input
/// gain so switching never clicks; the output gain fades in once on creation.
#[derive(Clone, Copy, Debug)]
pub struct ToggleGain {
    pub input: ResourceId,
    pub output: ResourceId,
}

impl ToggleGain {
    pub fn new(ctx: &mut SignalContext, fade_in: f64) -> Self {
        let input = ctx.create_with_value(ResourceKind::Gain, 1.0);
        let output = ctx.create_with_value(ResourceKind::Gain, 0.0);
        let now = ctx.current_time();
        let _ = ctx.schedule(output, Automation { time: now, value: 1.0, time_constant: fade_in });
        if let Err(err) = ctx.connect(input, output) {
            warn!(%err, "toggle gain chain could not be wired");
        }
        Self { input, output }
    }

    fn ramp(&self, ctx: &mut SignalContext, value: f64) {
        let time = ctx.current_time();
        if let Err(err) = ctx.schedule(self.input, Automation { time, value, time_constant: RAMP }) {
            warn!(%err, "toggle gain ramp on a released resource");
        }
    }

    pub fn enable(&self, ctx: &mut SignalContext) {
        self.ramp(ctx, 1.0);
    }

    pub fn disable(&self, ctx: &mut SignalContext) {
        self.ramp(ctx, 0.0);
    }
}
