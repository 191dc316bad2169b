mod throttle;

pub use throttle::LogThrottler;
