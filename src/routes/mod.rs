pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod polling;
pub(crate) mod reports;
pub(crate) mod scheduler;
