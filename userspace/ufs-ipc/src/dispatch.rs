// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tag-based dispatch of received requests.

use core::ops::Deref;

use crate::relocate::{Payload, ReceivedRequest};
use crate::request::{read_tag, AddressField, RequestBody};
use crate::requests::{visit_request, RequestKind};
use crate::{Error, Result};

/// Callable invoked with the statically typed body of a received request.
pub trait RequestVisitor {
    /// Result of one visit.
    type Output;

    /// Handles one request of kind `R::KIND`.
    fn visit<R: RequestBody>(&mut self, request: Typed<'_, R>) -> Self::Output;
}

/// Decoded body of kind `R` together with its payloads.
#[derive(Debug)]
pub struct Typed<'a, R> {
    body: R,
    source: &'a ReceivedRequest,
}

impl<'a, R: RequestBody> Typed<'a, R> {
    pub(crate) fn new(body: R, source: &'a ReceivedRequest) -> Self {
        Self { body, source }
    }

    /// Decoded fixed fields.
    pub fn body(&self) -> &R {
        &self.body
    }

    /// Takes the decoded fixed fields.
    pub fn into_body(self) -> R {
        self.body
    }

    /// Message the body was decoded from.
    pub fn source(&self) -> &'a ReceivedRequest {
        self.source
    }

    /// Payload of `field`.
    pub fn data(&self, field: AddressField<R>) -> Result<Option<Payload<'a>>> {
        self.source.data(field)
    }

    /// String payload of `field`.
    pub fn string(&self, field: AddressField<R>) -> Result<Option<String>> {
        self.source.string(field)
    }
}

impl<R> Deref for Typed<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.body
    }
}

/// Invokes `visitor` with the body of `request` downcast by its wire tag.
///
/// Tags outside the catalogue yield [`Error::BadData`] without a visit.
pub fn do_for_request<V: RequestVisitor>(
    request: &ReceivedRequest,
    visitor: &mut V,
) -> Result<V::Output> {
    let tag = read_tag(request.message())?;
    let kind = RequestKind::from_tag(tag).ok_or(Error::BadData)?;
    log::debug!("ufs-ipc: dispatching {}", kind.name());
    visit_request(kind, request, visitor)
}
