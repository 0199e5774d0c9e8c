//! Cloudflare API integration module.
//!
//! This module provides the client for the Cloudflare v4 REST API, covering
//! R2 buckets, AI Gateways and API tokens.

mod client;
mod types;

pub use client::{CloudflareClient, CLOUDFLARE_API_URL, GATEWAY_PERMISSION_GROUPS};
pub use types::{
    AiGateway, ApiMessage, CreateBucketRequest, CreateGatewayRequest, CreateTokenRequest,
    CreatedToken, Envelope, IpCondition, PermissionGroup, PermissionGroupRef, R2Bucket,
    TokenCondition, TokenPolicy,
};
