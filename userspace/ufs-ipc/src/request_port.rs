// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Request/reply sessions on top of a [`Port`]
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! PUBLIC API:
//!   - RequestPort::send_request(): build and send one message
//!   - RequestPort::receive_request(): receive and relocate one message
//!   - RequestPort::send_request_and_wait(): round trip, serving nested requests
//!   - RequestPort::send_reply()/release_reply(): receipt-ack handshake for area payloads
//!
//! INVARIANTS:
//!   - Areas of a sent request outlive the peer's use of them
//!   - A reply referencing areas is acknowledged only after its mappings are gone
//!   - A timed-out wait closes the port when configured to
//!   - A wait that ends before its reply leaves the port marked as having a reply in flight
//!   - Corrupt frames are skipped while waiting

use ufs_abi::Wait;

use crate::allocator::{RequestAllocator, SentRequest};
use crate::config::TransportConfig;
use crate::port::Port;
use crate::relocate::ReceivedRequest;
use crate::requests::{ReceiptAckReply, RequestKind};
use crate::{Error, Result};

/// Serves requests that arrive while waiting for a reply.
pub trait RequestHandler {
    /// Handles `request`; replies go out through `port`.
    fn handle_request(&mut self, port: &mut RequestPort, request: ReceivedRequest) -> Result<()>;
}

/// Handler that refuses nested requests.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectNested;

impl RequestHandler for RejectNested {
    fn handle_request(&mut self, _port: &mut RequestPort, request: ReceivedRequest) -> Result<()> {
        log::warn!("ufs-ipc: unexpected {} while waiting for a reply", request.kind().name());
        Err(Error::UnexpectedRequest(request.kind()))
    }
}

/// A [`Port`] driven as a request/reply session.
#[derive(Debug)]
pub struct RequestPort {
    port: Port,
    timeout: Wait,
    close_on_timeout: bool,
    reply_outstanding: bool,
}

impl RequestPort {
    /// Wraps `port`; waits block without limit.
    pub fn new(port: Port) -> Self {
        Self { port, timeout: Wait::Blocking, close_on_timeout: false, reply_outstanding: false }
    }

    /// Wraps `port` with the timeout policy of `config`.
    pub fn with_config(port: Port, config: &TransportConfig) -> Self {
        Self {
            port,
            timeout: config.request_wait(),
            close_on_timeout: config.close_on_timeout,
            reply_outstanding: false,
        }
    }

    /// Sets the wait used for replies and acknowledgements.
    pub fn with_timeout(mut self, timeout: Wait, close_on_timeout: bool) -> Self {
        self.timeout = timeout;
        self.close_on_timeout = close_on_timeout;
        self
    }

    /// Wait used for replies and acknowledgements.
    pub fn timeout(&self) -> Wait {
        self.timeout
    }

    /// Returns `true` when a request was sent but its reply never arrived.
    ///
    /// The late reply may still show up, so the port cannot start a new
    /// round trip.
    pub fn reply_outstanding(&self) -> bool {
        self.reply_outstanding
    }

    /// Underlying port.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Underlying port, mutably.
    pub fn port_mut(&mut self) -> &mut Port {
        &mut self.port
    }

    /// Unwraps the port.
    pub fn into_port(self) -> Port {
        self.port
    }

    /// Fresh allocator over the port buffer.
    pub fn allocator(&mut self) -> RequestAllocator<'_> {
        RequestAllocator::new(&mut self.port)
    }

    /// Builds a message with `build` and sends it.
    pub fn send_request<F>(&mut self, build: F) -> Result<SentRequest>
    where
        F: FnOnce(&mut RequestAllocator<'_>) -> Result<()>,
    {
        let mut allocator = RequestAllocator::new(&mut self.port);
        build(&mut allocator)?;
        allocator.send()
    }

    /// Receives and relocates one message.
    pub fn receive_request(&mut self, wait: Wait) -> Result<ReceivedRequest> {
        let mut allocator = RequestAllocator::new(&mut self.port);
        let read = allocator.read_request(wait).map(drop);
        match read {
            Ok(()) => allocator.take_request().ok_or(Error::BadData),
            Err(Error::TimedOut) if self.close_on_timeout => {
                drop(allocator);
                log::warn!("ufs-ipc: wait timed out, closing port");
                self.port.close();
                Err(Error::TimedOut)
            }
            Err(err) => Err(err),
        }
    }

    /// Sends a request and waits for a reply of `reply_kind`.
    ///
    /// Other messages arriving first are passed to `handler`. The request's
    /// areas are released once the reply is in.
    pub fn send_request_and_wait<F, H>(
        &mut self,
        build: F,
        reply_kind: RequestKind,
        handler: &mut H,
    ) -> Result<ReceivedRequest>
    where
        F: FnOnce(&mut RequestAllocator<'_>) -> Result<()>,
        H: RequestHandler + ?Sized,
    {
        let sent = self.send_request(build)?;
        let enclosing = self.reply_outstanding;
        self.reply_outstanding = true;
        loop {
            let request = match self.receive_request(self.timeout) {
                Ok(request) => request,
                Err(Error::BadData) => {
                    log::warn!(
                        "ufs-ipc: discarded corrupt frame while waiting for {}",
                        reply_kind.name()
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            if request.kind() == reply_kind {
                self.reply_outstanding = enclosing;
                drop(sent);
                return Ok(request);
            }
            log::trace!("ufs-ipc: nested {} before {}", request.kind().name(), reply_kind.name());
            handler.handle_request(self, request)?;
        }
    }

    /// Sends a reply built by `build`.
    ///
    /// When the reply overflowed into areas, blocks until the peer acknowledges
    /// receipt, then deletes the areas.
    pub fn send_reply<F>(&mut self, build: F) -> Result<()>
    where
        F: FnOnce(&mut RequestAllocator<'_>) -> Result<()>,
    {
        let sent = self.send_request(build)?;
        if sent.area_count() == 0 {
            return Ok(());
        }
        let ack = loop {
            match self.receive_request(self.timeout) {
                Err(Error::BadData) => {
                    log::warn!("ufs-ipc: discarded corrupt frame before receipt ack")
                }
                other => break other?,
            }
        };
        if ack.kind() != RequestKind::ReceiptAckReply {
            log::warn!("ufs-ipc: expected receipt ack, got {}", ack.kind().name());
            return Err(Error::UnexpectedRequest(ack.kind()));
        }
        log::trace!("ufs-ipc: receipt ack releases {} area(s)", sent.area_count());
        Ok(())
    }

    /// Drops a received reply, acknowledging it if it referenced areas.
    pub fn release_reply(&mut self, reply: ReceivedRequest) -> Result<()> {
        let needs_receipt = reply.needs_receipt();
        drop(reply);
        if needs_receipt {
            self.send_receipt_ack()?;
        }
        Ok(())
    }

    /// Sends a [`ReceiptAckReply`].
    pub fn send_receipt_ack(&mut self) -> Result<()> {
        self.send_request(|allocator| allocator.allocate_request(&ReceiptAckReply { error: 0 }))
            .map(drop)
    }

    /// Closes the underlying port.
    pub fn close(&mut self) {
        self.port.close();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use ufs_abi::Kernel;

    use super::*;
    use crate::requests::{
        GetVNodeReply, GetVNodeRequest, LookupReply, LookupRequest, ReadReply, ReadRequest,
    };

    fn pair(kernel: &Kernel, size: usize) -> (RequestPort, RequestPort) {
        let owner = Port::create(kernel, size).unwrap();
        let client = Port::attach(kernel, owner.info());
        (RequestPort::new(owner), RequestPort::new(client))
    }

    fn serve_read(server: &mut RequestPort, len: usize) -> Result<()> {
        let request = server.receive_request(Wait::Blocking)?;
        let body = request.body::<ReadRequest>()?;
        let len = len.min(body.size as usize);
        drop(request);
        server.send_reply(|allocator| {
            allocator.allocate_request(&ReadReply { error: 0, bytes_read: len as u64 })?;
            let mut slot = allocator.allocate_address(ReadReply::BUFFER, len, 1, false)?;
            for (i, byte) in slot.iter_mut().enumerate() {
                *byte = (i % 7) as u8;
            }
            Ok(())
        })
    }

    fn read(client: &mut RequestPort, size: u64) -> Result<Vec<u8>> {
        let reply = client.send_request_and_wait(
            |allocator| allocator.allocate_request(&ReadRequest { size, ..Default::default() }),
            RequestKind::ReadReply,
            &mut RejectNested,
        )?;
        let bytes_read = reply.body::<ReadReply>()?.bytes_read as usize;
        let data = reply.data(ReadReply::BUFFER)?.map(|payload| payload[..bytes_read].to_vec());
        client.release_reply(reply)?;
        data.ok_or(Error::BadData)
    }

    #[test]
    fn small_reply_needs_no_ack() {
        let kernel = Kernel::new();
        let (mut server, mut client) = pair(&kernel, 4096);
        thread::scope(|scope| {
            let handle = scope.spawn(|| serve_read(&mut server, 100));
            let data = read(&mut client, 100).unwrap();
            assert_eq!(data.len(), 100);
            assert_eq!(data[8], 1);
            handle.join().unwrap().unwrap();
        });
        assert_eq!(kernel.area_count(), 0);
    }

    #[test]
    fn area_reply_waits_for_receipt() {
        let kernel = Kernel::new();
        let (mut server, mut client) = pair(&kernel, 4096);
        thread::scope(|scope| {
            let handle = scope.spawn(|| serve_read(&mut server, 20_000));
            let data = read(&mut client, 20_000).unwrap();
            assert_eq!(data.len(), 20_000);
            assert!(data.iter().enumerate().all(|(i, &byte)| byte == (i % 7) as u8));
            handle.join().unwrap().unwrap();
        });
        assert_eq!(kernel.area_count(), 0);
    }

    #[test]
    fn wrong_ack_is_reported() {
        let kernel = Kernel::new();
        let (mut server, mut client) = pair(&kernel, 4096);
        thread::scope(|scope| {
            let handle = scope.spawn(|| serve_read(&mut server, 10_000));
            let reply = client
                .send_request_and_wait(
                    |allocator| {
                        allocator.allocate_request(&ReadRequest { size: 10_000, ..Default::default() })
                    },
                    RequestKind::ReadReply,
                    &mut RejectNested,
                )
                .unwrap();
            assert!(reply.needs_receipt());
            drop(reply);
            client
                .send_request(|allocator| allocator.allocate_request(&LookupReply::default()))
                .unwrap();
            assert_eq!(
                handle.join().unwrap().unwrap_err(),
                Error::UnexpectedRequest(RequestKind::LookupReply)
            );
        });
        assert_eq!(kernel.area_count(), 0);
    }

    struct VNodeLender {
        lent: Vec<u64>,
    }

    impl RequestHandler for VNodeLender {
        fn handle_request(&mut self, port: &mut RequestPort, request: ReceivedRequest) -> Result<()> {
            let body = request.body::<GetVNodeRequest>()?;
            self.lent.push(body.vnid);
            port.send_reply(|allocator| {
                allocator.allocate_request(&GetVNodeReply { error: 0, node: body.vnid * 10 })
            })
        }
    }

    #[test]
    fn nested_requests_are_served_while_waiting() {
        let kernel = Kernel::new();
        let (mut server, mut client) = pair(&kernel, 4096);
        thread::scope(|scope| {
            let handle = scope.spawn(move || -> Result<()> {
                let request = server.receive_request(Wait::Blocking)?;
                let name = request.string(LookupRequest::ENTRY_NAME)?.unwrap_or_default();
                assert_eq!(name, "child");
                let mut node = 0;
                for vnid in [3, 4] {
                    let reply = server.send_request_and_wait(
                        |allocator| {
                            allocator.allocate_request(&GetVNodeRequest { nsid: 1, vnid })
                        },
                        RequestKind::GetVNodeReply,
                        &mut RejectNested,
                    )?;
                    node += reply.body::<GetVNodeReply>()?.node;
                    server.release_reply(reply)?;
                }
                server.send_reply(|allocator| {
                    allocator.allocate_request(&LookupReply { error: 0, vnid: node })
                })
            });
            let mut lender = VNodeLender { lent: Vec::new() };
            let reply = client
                .send_request_and_wait(
                    |allocator| {
                        allocator.allocate_request(&LookupRequest::default())?;
                        allocator.allocate_string(LookupRequest::ENTRY_NAME, Some("child"), false)
                    },
                    RequestKind::LookupReply,
                    &mut lender,
                )
                .unwrap();
            assert_eq!(reply.body::<LookupReply>().unwrap().vnid, 70);
            assert_eq!(lender.lent, vec![3, 4]);
            client.release_reply(reply).unwrap();
            handle.join().unwrap().unwrap();
        });
    }

    #[test]
    fn rejected_nested_request_surfaces() {
        let kernel = Kernel::new();
        let (mut server, mut client) = pair(&kernel, 4096);
        server
            .send_request(|allocator| allocator.allocate_request(&GetVNodeRequest::default()))
            .unwrap();
        let err = client
            .send_request_and_wait(
                |allocator| allocator.allocate_request(&ReadRequest::default()),
                RequestKind::ReadReply,
                &mut RejectNested,
            )
            .unwrap_err();
        assert_eq!(err, Error::UnexpectedRequest(RequestKind::GetVNodeRequest));
        assert_eq!(
            server.receive_request(Wait::NonBlocking).unwrap().kind(),
            RequestKind::ReadRequest
        );
    }

    #[test]
    fn timeout_closes_port_when_configured() {
        let kernel = Kernel::new();
        let (server, client) = pair(&kernel, 4096);
        let mut client = client.with_timeout(Wait::Timeout(Duration::from_millis(10)), true);
        let err = client
            .send_request_and_wait(
                |allocator| allocator.allocate_request(&ReadRequest::default()),
                RequestKind::ReadReply,
                &mut RejectNested,
            )
            .unwrap_err();
        assert_eq!(err, Error::TimedOut);
        assert_eq!(client.port().init_check(), Err(Error::Closed));
        drop(server);
    }

    #[test]
    fn corrupt_frame_does_not_end_the_wait() {
        let kernel = Kernel::new();
        let (mut server, mut client) = pair(&kernel, 4096);
        let client_port = client.port().info().client_port;
        thread::scope(|scope| {
            let handle = scope.spawn(|| -> Result<()> {
                let request = server.receive_request(Wait::Blocking)?;
                let node = request.body::<LookupRequest>()?.node;
                drop(request);
                kernel.write_port(client_port, 0, &[0xff; 24], Wait::Blocking)?;
                server.send_reply(|allocator| {
                    allocator.allocate_request(&LookupReply { error: 0, vnid: node * 100 })
                })
            });
            let reply = client
                .send_request_and_wait(
                    |allocator| {
                        allocator.allocate_request(&LookupRequest { node: 2, ..Default::default() })
                    },
                    RequestKind::LookupReply,
                    &mut RejectNested,
                )
                .unwrap();
            assert_eq!(reply.body::<LookupReply>().unwrap().vnid, 200);
            client.release_reply(reply).unwrap();
            assert!(!client.reply_outstanding());
            handle.join().unwrap().unwrap();
        });
        assert_eq!(client.port().init_check(), Ok(()));
    }

    #[test]
    fn timed_out_wait_leaves_reply_outstanding() {
        let kernel = Kernel::new();
        let (_server, client) = pair(&kernel, 4096);
        let mut client = client.with_timeout(Wait::Timeout(Duration::from_millis(10)), false);
        let err = client
            .send_request_and_wait(
                |allocator| allocator.allocate_request(&LookupRequest::default()),
                RequestKind::LookupReply,
                &mut RejectNested,
            )
            .unwrap_err();
        assert_eq!(err, Error::TimedOut);
        assert!(client.reply_outstanding());
        assert_eq!(client.port().init_check(), Ok(()));
    }

    #[test]
    fn timeout_keeps_port_by_default() {
        let kernel = Kernel::new();
        let (_server, mut client) = pair(&kernel, 4096);
        let wait = Wait::Timeout(Duration::from_millis(5));
        assert_eq!(client.receive_request(wait).unwrap_err(), Error::TimedOut);
        assert_eq!(client.port().init_check(), Ok(()));
    }
}
