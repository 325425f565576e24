pub mod postgres;

pub use postgres::{
    average_interval_minutes, ColumnInfo, DailyPerformance, ErrorLog, OperationCount,
    OperationLog, PostgresPersistence, TABLES, TRUNCATE_ORDER,
};
