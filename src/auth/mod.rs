//! Authentication and authorization for Bursar
//!
//! Provides:
//! - JWT bearer-token validation (tokens are issued by the external
//!   identity provider; this service only verifies)
//! - Roles and the role → capability resolver

pub mod jwt;
pub mod permissions;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput, TokenValidationResult};
pub use permissions::{
    can_manage_role, capabilities_of, resolve, role_grants, Capability, Role,
};
