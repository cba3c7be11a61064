use crate::core::support::emulated_time::EmulatedTime;
use crate::core::support::simulation_time::SimulationTime;

/// Accounts for time spent executing code on the native CPU, and calculates a corresponding delay
/// for when the simulated CPU should be allowed to run next.
///
/// Native time is scaled by `native / simulated` frequency: a host configured with a CPU slower than
/// the machine running the simulation takes proportionally longer to finish the same work.
#[derive(Debug)]
pub struct Cpu {
    simulated_frequency_khz: u64,
    native_frequency_khz: u64,
    threshold: Option<SimulationTime>,
    precision: Option<SimulationTime>,
    now: EmulatedTime,
    time_cpu_available: EmulatedTime,
}

impl Cpu {
    /// `native_frequency_khz`: if None, the native frequency is unknown and native time is used
    /// unscaled.
    ///
    /// `threshold`: if None, never report a delay. Otherwise only report a delay after it is more
    /// than this threshold.
    ///
    /// `precision`: if provided, round individual native delays to this granularity (rounding up at
    /// midpoint). Panics if this is `Some(0)`.
    pub fn new(
        simulated_frequency_khz: u64,
        native_frequency_khz: Option<u64>,
        threshold: Option<SimulationTime>,
        precision: Option<SimulationTime>,
    ) -> Self {
        assert!(simulated_frequency_khz > 0);

        if let Some(precision) = precision {
            assert!(precision > SimulationTime::ZERO)
        }

        let native_frequency_khz = match native_frequency_khz {
            Some(0) | None => {
                log::warn!(
                    "Unable to determine the native CPU frequency; using the simulated frequency \
                     of {simulated_frequency_khz} KHz so that CPU delays are not scaled"
                );
                simulated_frequency_khz
            }
            Some(x) => x,
        };

        Self {
            simulated_frequency_khz,
            native_frequency_khz,
            threshold,
            precision,
            now: EmulatedTime::MIN,
            time_cpu_available: EmulatedTime::MIN,
        }
    }

    /// Configure the current time. The CPU can't be available before the current time, so if it
    /// has been idle its availability moves forward with the clock.
    pub fn update_time(&mut self, now: EmulatedTime) {
        self.now = now;
        self.time_cpu_available = std::cmp::max(self.time_cpu_available, now);
    }

    /// Account for `native_delay` spent natively executing code.
    pub fn add_delay(&mut self, native_delay: SimulationTime) {
        // first normalize the physical CPU to the virtual CPU
        let cycles = native_delay.as_nanos() * u128::from(self.native_frequency_khz);
        let simulated_delay_nanos = cycles / u128::from(self.simulated_frequency_khz);
        let mut adjusted_delay = u64::try_from(simulated_delay_nanos)
            .ok()
            .and_then(SimulationTime::try_from_nanos)
            .unwrap_or(SimulationTime::MAX);

        // round the adjusted delay to the nearest precision if needed
        if let Some(precision) = self.precision {
            let remainder = adjusted_delay % precision;

            // first round down (this is also the first step to rounding up)
            adjusted_delay -= remainder;

            // now check if we should round up
            let half_precision = precision / 2;
            if remainder >= half_precision {
                adjusted_delay = adjusted_delay.saturating_add(precision);
            }
        }

        self.time_cpu_available = self.time_cpu_available.saturating_add(adjusted_delay);
    }

    /// Calculate the simulated delay until this CPU is ready to run again.
    pub fn delay(&self) -> SimulationTime {
        let Some(threshold) = self.threshold else {
            return SimulationTime::ZERO;
        };
        let Some(built_up_delay) = self.time_cpu_available.checked_duration_since(&self.now) else {
            return SimulationTime::ZERO;
        };
        if built_up_delay > threshold {
            built_up_delay
        } else {
            SimulationTime::ZERO
        }
    }

    /// Whether the CPU has built up enough delay that the host shouldn't run yet.
    pub fn is_blocked(&self) -> bool {
        self.delay() > SimulationTime::ZERO
    }

    /// The time at which the CPU will be done with all of its accumulated work.
    pub fn time_available(&self) -> EmulatedTime {
        self.time_cpu_available
    }
}
