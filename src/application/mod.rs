// Application layer - Aggregation and ingest use cases
pub mod clock;
pub mod day_aggregator;
pub mod day_sink;
pub mod ingest_service;
