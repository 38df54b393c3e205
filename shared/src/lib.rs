//! Shared library for the Natours booking functions.
//!
//! This crate provides the booking logic, the document database and telemetry
//! clients, and the HTTP glue used by every function binary.

pub mod bookings;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testutils;

pub use bookings::BookingHandler;
pub use config::Config;
pub use error::{Error, Result};
pub use http::{FunctionRequest, Reply};
pub use models::{Booking, ConfigResponse, CreateBookingRequest, CreatedBooking, NatoursUser, TourType};
pub use store::{ContainerHandle, CosmosClient, DocumentStore, SqlQuerySpec, StoreAccessor};
pub use telemetry::{AppInsights, ConnectionString, Telemetry};
