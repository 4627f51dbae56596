pub(crate) mod attempt_timing;
pub(crate) mod engine;
pub(crate) mod notifications;
pub(crate) mod ordering;
pub(crate) mod ports;
pub(crate) mod results;
pub(crate) mod results_export;
pub(crate) mod scoring;
