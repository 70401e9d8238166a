//! # Notary Kernel Testkit
//!
//! Testing utilities for the Notary Kernel.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Fixed inputs whose receipt hashes must not drift
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A notary on a memory store with a manual clock, and
//!   offline-signed chains
//!
//! ## Golden Vectors
//!
//! ```rust
//! use notary_kernel_testkit::vectors::{all_vectors, receipt_from_vector};
//!
//! for vector in all_vectors() {
//!     let receipt = receipt_from_vector(&vector);
//!     println!("{}: {}", vector.name, receipt.receipt_hash().unwrap());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use notary_kernel_core::{Verifier, VerifyPolicy};
//! use notary_kernel_testkit::generators::{ReceiptParams, receipt_from_params};
//!
//! proptest! {
//!     #[test]
//!     fn issued_receipts_verify(params: ReceiptParams) {
//!         let (receipt, registry) = receipt_from_params(&params);
//!         let verifier = Verifier::new(&registry, VerifyPolicy::default());
//!         prop_assert!(verifier.verify(&receipt, None, chrono::Utc::now()).valid);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use notary_kernel_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! assert_eq!(fixture.notary.signer_id(), "notary-test");
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    epoch, init_tracing, kyc_decline, signed_chain, signing_key, TestFixture, SIGNER_ID,
};
pub use generators::{receipt_from_params, ReceiptParams};
pub use vectors::{all_vectors, receipt_from_vector, verify_all_vectors, GoldenVector};
