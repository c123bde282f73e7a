//! Route-level EQ composition: a route's effective EQ is its source's
//! 18-band gains multiplied by its sink's, built with
//! [`crate::sip::eq::EqGains::compose`] so a flat EQ at either end never
//! adds a degenerate all-pass stage.

use crate::sip::eq::EqGains;

pub fn compose_route_eq(source_gains: &EqGains, sink_gains: &EqGains) -> EqGains {
    source_gains.compose(sink_gains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::eq::BAND_COUNT;

    #[test]
    fn flat_sink_eq_leaves_source_eq_untouched() {
        let mut gains = [1.0; BAND_COUNT];
        gains[2] = 0.8;
        let source = EqGains(gains);
        let flat_sink = EqGains::default();
        let composed = compose_route_eq(&source, &flat_sink);
        assert_eq!(composed.0[2], 0.8);
    }
}
