pub mod job_engine;
pub mod providers;
pub mod row_status;
pub mod status_mapping;

#[cfg(test)]
pub mod test_support;
