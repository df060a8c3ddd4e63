//! Database repository implementations using SQLx
//!
//! SQLx-based implementations of the `buzz-core` repository traits,
//! replacing the in-memory storage with persistent database operations.

pub mod budget_repository;
pub mod business_repository;
pub mod coupon_repository;
pub mod mileage_repository;
pub mod settlement_repository;

pub use budget_repository::SqlxBudgetPolicyStore;
pub use business_repository::SqlxBusinessDirectory;
pub use coupon_repository::SqlxCouponRepository;
pub use mileage_repository::SqlxMileageRepository;
pub use settlement_repository::SqlxSettlementRepository;
