// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The request and reply catalogue.
//!
//! Each entry declares a kind once: its wire tag, its address fields (marked
//! with `@`) and its fixed fields. From that single declaration the macro
//! derives the body struct, the [`RequestKind`] tag, the [`Request`] sum
//! type, the address table used by relocation and the exhaustive dispatch
//! match, so a new kind cannot be half-registered.
//!
//! Kernel-issued requests start with a [`KernelContext`]; replies start with
//! a status code (see [`crate::status`]).

use crate::dispatch::{RequestVisitor, Typed};
use crate::relocate::ReceivedRequest;
use crate::request::{decode_fixed, AddressField, AddressInfo, RequestBody, RequestLayout};
use crate::wire::{
    AttrInfo, FsInfo, IndexInfo, KernelContext, Stat, WireField, WireReader, WireWriter,
    FILE_NAME_LENGTH, OS_NAME_LENGTH, PATH_NAME_LENGTH,
};
use crate::Result;

/// Maximum size of mount parameters, terminator included.
pub const PARAMETERS_LENGTH: usize = 16 * 1024;
/// Maximum size of a query string, terminator included.
pub const QUERY_LENGTH: usize = 64 * 1024;

macro_rules! address_fields {
    ($ty:ident; $idx:expr;) => {};
    ($ty:ident; $idx:expr; $head:ident $(, $tail:ident)*) => {
        #[doc = concat!("Address field `", stringify!($head), "`.")]
        pub const $head: AddressField<$ty> = AddressField::new($idx);
        address_fields!($ty; $idx + 1; $($tail),*);
    };
}

macro_rules! requests {
    ($(
        $(#[$meta:meta])*
        $name:ident = $tag:literal {
            $( @$addr:ident: $info:expr, )*
            $( $field:ident: $ty:ty, )*
        }
    )*) => {
        /// Closed set of request and reply kinds; the discriminant is the wire tag.
        #[repr(u32)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum RequestKind {
            $(
                #[doc = concat!("Tag of [`", stringify!($name), "`].")]
                $name = $tag,
            )*
        }

        impl RequestKind {
            /// Every kind, in tag order.
            pub const ALL: &'static [RequestKind] = &[$(RequestKind::$name,)*];

            /// Wire tag.
            pub const fn tag(self) -> u32 {
                self as u32
            }

            /// Looks up a wire tag; `None` for tags outside the catalogue.
            pub const fn from_tag(tag: u32) -> Option<Self> {
                match tag {
                    $( $tag => Some(Self::$name), )*
                    _ => None,
                }
            }

            /// Type name of the body.
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                }
            }

            /// Fixed-portion layout, including the address table.
            pub const fn layout(self) -> RequestLayout {
                match self {
                    $( Self::$name => <$name as RequestBody>::LAYOUT, )*
                }
            }
        }

        $(
            $(#[$meta])*
            #[derive(Clone, Debug, Default, PartialEq, Eq)]
            pub struct $name {
                $(
                    #[allow(missing_docs)]
                    pub $field: $ty,
                )*
            }

            impl $name {
                address_fields!($name; 0usize; $($addr),*);
            }

            impl RequestBody for $name {
                const KIND: RequestKind = RequestKind::$name;
                const ADDRESSES: &'static [AddressInfo] = &[$($info,)*];
                const BODY_SIZE: usize = 0 $(+ <$ty as WireField>::SIZE)*;

                #[allow(unused_variables)]
                fn encode_body(&self, w: &mut WireWriter<'_>) -> Result<()> {
                    $( self.$field.put(w)?; )*
                    Ok(())
                }

                #[allow(unused_variables)]
                fn decode_body(r: &mut WireReader<'_>) -> Result<Self> {
                    Ok(Self { $( $field: <$ty as WireField>::get(r)?, )* })
                }
            }

            impl From<$name> for Request {
                fn from(body: $name) -> Self {
                    Self::$name(body)
                }
            }
        )*

        /// Any request or reply, decoded by value.
        #[allow(clippy::large_enum_variant)]
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Request {
            $(
                #[allow(missing_docs)]
                $name($name),
            )*
        }

        impl Request {
            /// Kind of the contained body.
            pub fn kind(&self) -> RequestKind {
                match self {
                    $( Self::$name(_) => RequestKind::$name, )*
                }
            }
        }

        pub(crate) fn decode_request(kind: RequestKind, message: &[u8]) -> Result<Request> {
            match kind {
                $( RequestKind::$name => Ok(Request::$name(decode_fixed::<$name>(message)?)), )*
            }
        }

        pub(crate) fn visit_request<V: RequestVisitor>(
            kind: RequestKind,
            request: &ReceivedRequest,
            visitor: &mut V,
        ) -> Result<V::Output> {
            match kind {
                $( RequestKind::$name => {
                    let typed: Typed<'_, $name> = request.typed()?;
                    Ok(visitor.visit(typed))
                } )*
            }
        }
    };
}

requests! {
    // administrative

    /// Tears down a connection.
    UfsDisconnectRequest = 0 {}
    /// Asks the server to attach a filesystem by name.
    FsConnectRequest = 1 {
        @FS_NAME: AddressInfo::string(OS_NAME_LENGTH),
    }
    /// Port infos of the server's request ports.
    FsConnectReply = 2 {
        @PORT_INFOS: AddressInfo::data_max(64 * 1024),
        error: i32,
        port_info_count: u32,
        capabilities: u64,
    }

    // volumes

    /// Mounts a volume.
    MountVolumeRequest = 3 {
        @CWD: AddressInfo::string(PATH_NAME_LENGTH),
        @DEVICE: AddressInfo::string(PATH_NAME_LENGTH),
        @PARAMETERS: AddressInfo::string(PARAMETERS_LENGTH),
        ctx: KernelContext,
        nsid: i32,
        flags: u32,
    }
    /// Result of a mount.
    MountVolumeReply = 4 {
        error: i32,
        root_id: u64,
        volume: u64,
        capabilities: u64,
    }
    /// Unmounts a volume.
    UnmountVolumeRequest = 5 {
        ctx: KernelContext,
        volume: u64,
    }
    /// Result of an unmount.
    UnmountVolumeReply = 6 {
        error: i32,
    }
    /// Flushes a volume.
    SyncVolumeRequest = 7 {
        ctx: KernelContext,
        volume: u64,
    }
    /// Result of a sync.
    SyncVolumeReply = 8 {
        error: i32,
    }
    /// Reads volume information.
    ReadFsInfoRequest = 9 {
        ctx: KernelContext,
        volume: u64,
    }
    /// Volume information.
    ReadFsInfoReply = 10 {
        error: i32,
        info: FsInfo,
    }
    /// Updates volume information selected by `mask`.
    WriteFsInfoRequest = 11 {
        ctx: KernelContext,
        volume: u64,
        info: FsInfo,
        mask: u32,
    }
    /// Result of a volume information update.
    WriteFsInfoReply = 12 {
        error: i32,
    }

    // vnodes

    /// Resolves a name in a directory.
    LookupRequest = 13 {
        @ENTRY_NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        traverse_link: bool,
    }
    /// Resolved node id.
    LookupReply = 14 {
        error: i32,
        vnid: u64,
    }
    /// Asks for a node's own name.
    GetVNodeNameRequest = 15 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        size: u32,
    }
    /// Node name.
    GetVNodeNameReply = 16 {
        @BUFFER: AddressInfo::string(FILE_NAME_LENGTH),
        error: i32,
    }
    /// Loads a node.
    ReadVNodeRequest = 17 {
        ctx: KernelContext,
        volume: u64,
        vnid: u64,
        reenter: bool,
    }
    /// Loaded node.
    ReadVNodeReply = 18 {
        error: i32,
        node: u64,
        node_type: u32,
        flags: u32,
        capabilities: u64,
    }
    /// Releases a node.
    WriteVNodeRequest = 19 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        reenter: bool,
    }
    /// Result of a node release.
    WriteVNodeReply = 20 {
        error: i32,
    }
    /// Deletes a node that has no more links.
    FsRemoveVNodeRequest = 21 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        reenter: bool,
    }
    /// Result of a node deletion.
    FsRemoveVNodeReply = 22 {
        error: i32,
    }

    // nodes

    /// Device control.
    IoctlRequest = 23 {
        @BUFFER: AddressInfo::data(),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        file_cookie: u64,
        command: u32,
        buffer_parameter: u64,
        len_parameter: u64,
        is_buffer: bool,
        write_size: i32,
    }
    /// Device control result.
    IoctlReply = 24 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        ioctl_error: i32,
    }
    /// Reads a symlink target.
    ReadSymlinkRequest = 25 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        size: u32,
    }
    /// Symlink target.
    ReadSymlinkReply = 26 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        bytes_read: u32,
    }
    /// Creates a symlink.
    CreateSymlinkRequest = 27 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        @TARGET: AddressInfo::string(PATH_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        mode: u32,
    }
    /// Result of a symlink creation.
    CreateSymlinkReply = 28 {
        error: i32,
    }
    /// Creates a hard link.
    LinkRequest = 29 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        target: u64,
    }
    /// Result of a link.
    LinkReply = 30 {
        error: i32,
    }
    /// Removes a directory entry.
    UnlinkRequest = 31 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
    }
    /// Result of an unlink.
    UnlinkReply = 32 {
        error: i32,
    }
    /// Moves a directory entry.
    RenameRequest = 33 {
        @OLD_NAME: AddressInfo::string(FILE_NAME_LENGTH),
        @NEW_NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        old_dir: u64,
        new_dir: u64,
    }
    /// Result of a rename.
    RenameReply = 34 {
        error: i32,
    }
    /// Checks access permissions.
    AccessRequest = 35 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        mode: i32,
    }
    /// Result of an access check.
    AccessReply = 36 {
        error: i32,
    }
    /// Reads node status.
    ReadStatRequest = 37 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
    }
    /// Node status.
    ReadStatReply = 38 {
        error: i32,
        st: Stat,
    }
    /// Updates node status selected by `mask`.
    WriteStatRequest = 39 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        st: Stat,
        mask: u32,
    }
    /// Result of a status update.
    WriteStatReply = 40 {
        error: i32,
    }

    // files

    /// Creates and opens a file.
    CreateRequest = 41 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        open_mode: i32,
        mode: u32,
    }
    /// Created file.
    CreateReply = 42 {
        error: i32,
        vnid: u64,
        file_cookie: u64,
    }
    /// Opens a file.
    OpenRequest = 43 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        open_mode: i32,
    }
    /// Open file cookie.
    OpenReply = 44 {
        error: i32,
        file_cookie: u64,
    }
    /// Closes a file.
    CloseRequest = 45 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        file_cookie: u64,
    }
    /// Result of a close.
    CloseReply = 46 {
        error: i32,
    }
    /// Frees a closed file cookie.
    FreeCookieRequest = 47 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        file_cookie: u64,
    }
    /// Result of a cookie release.
    FreeCookieReply = 48 {
        error: i32,
    }
    /// Reads file data.
    ReadRequest = 49 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        file_cookie: u64,
        pos: i64,
        size: u64,
    }
    /// File data.
    ReadReply = 50 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        bytes_read: u64,
    }
    /// Writes file data.
    WriteRequest = 51 {
        @BUFFER: AddressInfo::data(),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        file_cookie: u64,
        pos: i64,
    }
    /// Result of a write.
    WriteReply = 52 {
        error: i32,
        bytes_written: u64,
    }

    // directories

    /// Creates a directory.
    CreateDirRequest = 53 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        mode: u32,
    }
    /// Created directory.
    CreateDirReply = 54 {
        error: i32,
        new_dir: u64,
    }
    /// Removes an empty directory.
    RemoveDirRequest = 55 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
    }
    /// Result of a directory removal.
    RemoveDirReply = 56 {
        error: i32,
    }
    /// Opens a directory for iteration.
    OpenDirRequest = 57 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
    }
    /// Directory cookie.
    OpenDirReply = 58 {
        error: i32,
        dir_cookie: u64,
    }
    /// Closes a directory.
    CloseDirRequest = 59 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        dir_cookie: u64,
    }
    /// Result of a directory close.
    CloseDirReply = 60 {
        error: i32,
    }
    /// Frees a closed directory cookie.
    FreeDirCookieRequest = 61 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        dir_cookie: u64,
    }
    /// Result of a directory cookie release.
    FreeDirCookieReply = 62 {
        error: i32,
    }
    /// Reads directory entries.
    ReadDirRequest = 63 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        dir_cookie: u64,
        buffer_size: u32,
        count: u32,
    }
    /// Packed directory entries.
    ReadDirReply = 64 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        count: u32,
    }
    /// Restarts directory iteration.
    RewindDirRequest = 65 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        dir_cookie: u64,
    }
    /// Result of a directory rewind.
    RewindDirReply = 66 {
        error: i32,
    }

    // attribute directories

    /// Opens a node's attribute directory.
    OpenAttrDirRequest = 67 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
    }
    /// Attribute directory cookie.
    OpenAttrDirReply = 68 {
        error: i32,
        attr_dir_cookie: u64,
    }
    /// Closes an attribute directory.
    CloseAttrDirRequest = 69 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        attr_dir_cookie: u64,
    }
    /// Result of an attribute directory close.
    CloseAttrDirReply = 70 {
        error: i32,
    }
    /// Reads attribute names.
    ReadAttrDirRequest = 71 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        attr_dir_cookie: u64,
        buffer_size: u32,
        count: u32,
    }
    /// Packed attribute directory entries.
    ReadAttrDirReply = 72 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        count: u32,
    }
    /// Restarts attribute directory iteration.
    RewindAttrDirRequest = 73 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        attr_dir_cookie: u64,
    }
    /// Result of an attribute directory rewind.
    RewindAttrDirReply = 74 {
        error: i32,
    }

    // attributes

    /// Creates an attribute and opens it.
    CreateAttrRequest = 75 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        attr_type: u32,
        open_mode: i32,
    }
    /// Attribute cookie.
    CreateAttrReply = 76 {
        error: i32,
        attr_cookie: u64,
    }
    /// Opens an attribute.
    OpenAttrRequest = 77 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        open_mode: i32,
    }
    /// Attribute cookie.
    OpenAttrReply = 78 {
        error: i32,
        attr_cookie: u64,
    }
    /// Closes an attribute.
    CloseAttrRequest = 79 {
        ctx: KernelContext,
        volume: u64,
        node: u64,
        attr_cookie: u64,
    }
    /// Result of an attribute close.
    CloseAttrReply = 80 {
        error: i32,
    }
    /// Reads attribute data by name.
    ReadAttrRequest = 81 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        pos: i64,
        size: u64,
    }
    /// Attribute data.
    ReadAttrReply = 82 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        bytes_read: u64,
    }
    /// Writes attribute data by name.
    WriteAttrRequest = 83 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        @BUFFER: AddressInfo::data(),
        ctx: KernelContext,
        volume: u64,
        node: u64,
        attr_type: u32,
        pos: i64,
    }
    /// Result of an attribute write.
    WriteAttrReply = 84 {
        error: i32,
        bytes_written: u64,
    }
    /// Reads attribute type and size.
    ReadAttrStatRequest = 85 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
    }
    /// Attribute type and size.
    ReadAttrStatReply = 86 {
        error: i32,
        info: AttrInfo,
    }
    /// Renames an attribute, possibly across nodes.
    RenameAttrRequest = 87 {
        @OLD_NAME: AddressInfo::string(FILE_NAME_LENGTH),
        @NEW_NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        old_node: u64,
        new_node: u64,
    }
    /// Result of an attribute rename.
    RenameAttrReply = 88 {
        error: i32,
    }
    /// Removes an attribute.
    RemoveAttrRequest = 89 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        node: u64,
    }
    /// Result of an attribute removal.
    RemoveAttrReply = 90 {
        error: i32,
    }

    // indices

    /// Opens the volume's index directory.
    OpenIndexDirRequest = 91 {
        ctx: KernelContext,
        volume: u64,
    }
    /// Index directory cookie.
    OpenIndexDirReply = 92 {
        error: i32,
        index_dir_cookie: u64,
    }
    /// Reads index names.
    ReadIndexDirRequest = 93 {
        ctx: KernelContext,
        volume: u64,
        index_dir_cookie: u64,
        buffer_size: u32,
        count: u32,
    }
    /// Packed index directory entries.
    ReadIndexDirReply = 94 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        count: u32,
    }
    /// Creates an index.
    CreateIndexRequest = 95 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
        index_type: u32,
        flags: u32,
    }
    /// Result of an index creation.
    CreateIndexReply = 96 {
        error: i32,
    }
    /// Removes an index.
    RemoveIndexRequest = 97 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
    }
    /// Result of an index removal.
    RemoveIndexReply = 98 {
        error: i32,
    }
    /// Reads index information.
    ReadIndexStatRequest = 99 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        ctx: KernelContext,
        volume: u64,
    }
    /// Index information.
    ReadIndexStatReply = 100 {
        error: i32,
        info: IndexInfo,
    }

    // queries

    /// Starts a query.
    OpenQueryRequest = 101 {
        @QUERY_STRING: AddressInfo::string(QUERY_LENGTH),
        ctx: KernelContext,
        volume: u64,
        flags: u32,
        port: i32,
        token: u32,
    }
    /// Query cookie.
    OpenQueryReply = 102 {
        error: i32,
        query_cookie: u64,
    }
    /// Ends a query.
    CloseQueryRequest = 103 {
        ctx: KernelContext,
        volume: u64,
        query_cookie: u64,
    }
    /// Result of a query close.
    CloseQueryReply = 104 {
        error: i32,
    }
    /// Reads query results.
    ReadQueryRequest = 105 {
        ctx: KernelContext,
        volume: u64,
        query_cookie: u64,
        buffer_size: u32,
        count: u32,
    }
    /// Packed query results.
    ReadQueryReply = 106 {
        @BUFFER: AddressInfo::data(),
        error: i32,
        count: u32,
    }

    // node monitoring

    /// Delivers a node monitoring event to a userland listener.
    NodeMonitoringEventRequest = 107 {
        @EVENT: AddressInfo::data_max(64 * 1024),
        ctx: KernelContext,
        listener: u64,
    }
    /// Result of an event delivery.
    NodeMonitoringEventReply = 108 {
        error: i32,
    }

    // notifications (userland to kernel)

    /// Reports an entry change to node listeners.
    NotifyListenerRequest = 109 {
        @OLD_NAME: AddressInfo::string(FILE_NAME_LENGTH),
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        operation: i32,
        details: u32,
        device: i32,
        old_directory: u64,
        directory: u64,
        node: u64,
    }
    /// Result of a listener notification.
    NotifyListenerReply = 110 {
        error: i32,
    }
    /// Reports a select event.
    NotifySelectEventRequest = 111 {
        sync: u64,
        event: u8,
        unspecified_event: bool,
    }
    /// Result of a select notification.
    NotifySelectEventReply = 112 {
        error: i32,
    }
    /// Reports a live query update.
    NotifyQueryRequest = 113 {
        @NAME: AddressInfo::string(FILE_NAME_LENGTH),
        port: i32,
        token: i32,
        operation: i32,
        device: i32,
        directory: u64,
        node: u64,
    }
    /// Result of a query notification.
    NotifyQueryReply = 114 {
        error: i32,
    }

    // vnodes (userland to kernel)

    /// Gets a reference to a vnode.
    GetVNodeRequest = 115 {
        nsid: i32,
        vnid: u64,
    }
    /// Referenced vnode.
    GetVNodeReply = 116 {
        error: i32,
        node: u64,
    }
    /// Puts a vnode reference.
    PutVNodeRequest = 117 {
        nsid: i32,
        vnid: u64,
    }
    /// Result of a put.
    PutVNodeReply = 118 {
        error: i32,
    }
    /// Acquires an extra vnode reference.
    AcquireVNodeRequest = 119 {
        nsid: i32,
        vnid: u64,
    }
    /// Result of an acquire.
    AcquireVNodeReply = 120 {
        error: i32,
    }
    /// Registers a new, not yet published vnode.
    NewVNodeRequest = 121 {
        nsid: i32,
        vnid: u64,
        node: u64,
        capabilities: u64,
    }
    /// Result of a vnode registration.
    NewVNodeReply = 122 {
        error: i32,
    }
    /// Publishes a vnode.
    PublishVNodeRequest = 123 {
        nsid: i32,
        vnid: u64,
        node: u64,
        node_type: u32,
        flags: u32,
        capabilities: u64,
    }
    /// Result of a publish.
    PublishVNodeReply = 124 {
        error: i32,
    }
    /// Marks a vnode removed.
    RemoveVNodeRequest = 125 {
        nsid: i32,
        vnid: u64,
    }
    /// Result of a removal mark.
    RemoveVNodeReply = 126 {
        error: i32,
    }
    /// Clears a removal mark.
    UnremoveVNodeRequest = 127 {
        nsid: i32,
        vnid: u64,
    }
    /// Result of an unremove.
    UnremoveVNodeReply = 128 {
        error: i32,
    }
    /// Queries a vnode's removal mark.
    GetVNodeRemovedRequest = 129 {
        nsid: i32,
        vnid: u64,
    }
    /// Removal mark.
    GetVNodeRemovedReply = 130 {
        error: i32,
        removed: bool,
    }

    // general

    /// Confirms that the payload of a reply has been consumed.
    ReceiptAckReply = 131 {
        error: i32,
    }
}
