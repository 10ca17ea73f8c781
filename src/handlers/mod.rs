//! Handlers the PMS services register for each other's events
//!
//! - [`SiteReplicaHandler`]: Booking keeps a local copy of every site
//! - [`InvoiceOnBookingHandler`]: Invoice bills every booked ticket and
//!   submits the invoice to the ERP
//!
//! Both are safe to run on redelivered events. Storage and the ERP client are
//! traits the host service implements; memory versions are included.

pub mod invoice;
pub mod site_replica;

pub use invoice::{
    ErpGateway, ErpInvoice, Invoice, InvoiceLedger, InvoiceOnBookingHandler, MemoryErpGateway,
    MemoryInvoiceLedger, Ticket,
};
pub use site_replica::{MemorySiteReplicaStore, SiteReplica, SiteReplicaHandler, SiteReplicaStore};
