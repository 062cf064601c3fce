//! Azure AD authentication module.
//!
//! Provides the OAuth2 authorization code client, the Microsoft Graph profile
//! client and in-memory token holding.

pub mod graph;
pub mod oauth;
pub mod secure;
pub mod token_store;
