//! Dynamic-address-translation fast path and cross-CPU translation housekeeping.
//!
//! This crate implements the storage-access entry points that every emulated instruction goes
//! through:
//! - [`maddr_l`]: logical → absolute translation through a per-CPU software TLB, falling back to
//!   an architecture-specific [`Translator`] on a miss, and feeding the result to the
//!   transactional conflict engine when the facility is enabled
//! - [`purge_tlb_all`], [`purge_tlbe_all`], [`purge_alb_all`]: synchronous invalidation of other
//!   CPUs' TLB / ART-lookaside buffer
//! - [`authorize_asn`]: authority-table check for ASN translation
//!
//! Architectures are expressed as marker types implementing [`Arch`] ([`S370`], [`S390`],
//! [`Z900`]); the shared code is written once and monomorphized per architecture.

mod access;
mod arch;
mod auth;
mod config;
mod cpu;
mod error;
mod interlock;
mod invalidate;
mod maddr;
mod registry;
mod regs;
mod stats;
mod system;
mod tlb;

pub use access::{
    AccessType, AddressSpaceControl, ArSelector, CR_HOME, CR_PRIMARY, CR_SECONDARY,
};
pub use arch::{Arch, ArchMode, S370, S390, Z900};
pub use auth::{authorize_asn, AteMask, ASTE0_ATO, ASTE1_ATL};
pub use config::SystemConfig;
pub use cpu::{CpuContext, CpuShared, Facilities, SieZone};
pub use error::{ConfigError, InstructionFault, ProgramInterrupt};
pub use interlock::{Interlock, InterlockGuard};
pub use invalidate::{purge_alb_all, purge_tlb_all, purge_tlbe_all, CpuTarget};
pub use maddr::{maddr_l, Translator};
pub use registry::CpuRegistry;
pub use regs::{DatRegs, CR_ALB_OFFSET, CR_SLOTS};
pub use stats::TlbStats;
pub use system::System;
pub use tlb::{entry_hits, tlb_index, Tlb, TlbEntry, TlbFill, PAGE_SHIFT, TLBID_BYTEMASK, TLBN};
