//! # Tests for the VMX bring-up crate.
//!
//! Everything runs against [`FakeHardware`](crate::fake::FakeHardware), real MSRs are never
//! touched.

mod controls;
