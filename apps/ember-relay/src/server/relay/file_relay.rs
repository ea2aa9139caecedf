use ember_protocol::FileMetadata;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FileMetaGuard {
    Relay,
    RejectMissingId,
    RejectTooLarge,
}

/// Gate on a transfer announcement. The relay never inspects or stores
/// file bytes; this is the only place the declared size matters.
pub(crate) fn check_file_meta(meta: &FileMetadata, max_file_bytes: usize) -> FileMetaGuard {
    if meta.id.trim().is_empty() {
        return FileMetaGuard::RejectMissingId;
    }
    if meta.size > max_file_bytes as u64 {
        return FileMetaGuard::RejectTooLarge;
    }
    FileMetaGuard::Relay
}

pub(crate) fn chunk_is_well_formed(chunk: &str) -> bool {
    !chunk.is_empty()
}
