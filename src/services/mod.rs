pub mod cache_service;
pub mod job_executor;
pub mod job_health;
pub mod job_scheduler_service;
pub mod notification_service;
pub mod processor;
pub mod rate_limiter;
pub mod report_service;
pub mod retry;
pub mod worker_pool;
