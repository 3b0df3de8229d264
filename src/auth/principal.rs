//! Caller identity, resolved once at the HTTP boundary.
//!
//! The upstream session layer authenticates the browser and forwards the
//! identity as `x-customer-id` or `x-merchant-id`. Handlers take a
//! [`Principal`] (or one of the narrower extractors) and never inspect the
//! headers again.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind};

pub const CUSTOMER_HEADER: &str = "x-customer-id";
pub const MERCHANT_HEADER: &str = "x-merchant-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Customer(Uuid),
    Merchant(Uuid),
}

impl Principal {
    pub fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        let header = |name: &str| -> Result<Option<Uuid>, AppError> {
            match parts.headers.get(name) {
                None => Ok(None),
                Some(value) => value
                    .to_str()
                    .ok()
                    .and_then(|v| Uuid::parse_str(v.trim()).ok())
                    .map(Some)
                    .ok_or_else(|| AppError::validation(name, "not a valid identifier")),
            }
        };

        match (header(CUSTOMER_HEADER)?, header(MERCHANT_HEADER)?) {
            (Some(_), Some(_)) => Err(AppError::forbidden(
                "Request carries both a customer and a merchant identity",
            )),
            (Some(id), None) => Ok(Principal::Customer(id)),
            (None, Some(id)) => Ok(Principal::Merchant(id)),
            (None, None) => Err(AppError::new(AppErrorKind::Unauthenticated)),
        }
    }

    pub fn customer_id(&self) -> Option<Uuid> {
        match self {
            Principal::Customer(id) => Some(*id),
            Principal::Merchant(_) => None,
        }
    }

    pub fn merchant_id(&self) -> Option<Uuid> {
        match self {
            Principal::Merchant(id) => Some(*id),
            Principal::Customer(_) => None,
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_parts(parts)
    }
}

/// Extractor for customer-only routes.
#[derive(Debug, Clone, Copy)]
pub struct CustomerId(pub Uuid);

impl<S> FromRequestParts<S> for CustomerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_parts(parts)?
            .customer_id()
            .map(CustomerId)
            .ok_or_else(|| AppError::forbidden("This action is only available to customers"))
    }
}

/// Extractor for merchant routes. A customer hitting a merchant route is
/// passed through as `None` so ticket redemption can record the attempt as
/// unauthorized instead of dropping it.
#[derive(Debug, Clone, Copy)]
pub struct MaybeMerchant(pub Option<Uuid>);

impl<S> FromRequestParts<S> for MaybeMerchant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match Principal::from_parts(parts) {
            Ok(principal) => Ok(MaybeMerchant(principal.merchant_id())),
            Err(AppError {
                kind: AppErrorKind::Unauthenticated,
                ..
            }) => Ok(MaybeMerchant(None)),
            Err(e) => Err(e),
        }
    }
}
