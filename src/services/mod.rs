pub mod bill_calculator;
pub mod bill_store;
pub mod bill_validation;
pub mod monthly_report;
pub mod owner_relations;
