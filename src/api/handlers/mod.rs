pub mod control;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod portfolio;
pub mod positions;
pub mod risk;
pub mod whales;
