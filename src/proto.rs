/// Wire schema for the admin protocol.
///
/// Messages are declared by hand with prost derives rather than generated
/// from a .proto file; tags and labels are the protocol contract and must
/// not change. All requests travel inside an `AdminRequest` envelope whose
/// `type` field selects the populated sub-request. Responses are
/// message-specific and all carry an optional `error` field; a response is
/// a failure iff that field is set.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum AdminRequestType {
    GetMetadata = 0,
    UpdateMetadata = 1,
    UpdatePartitionEntries = 2,
    FetchPartitionEntries = 3,
    DeletePartitionEntries = 4,
    InitiateFetchAndUpdate = 5,
    AsyncOperationStatus = 6,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClockEntry {
    #[prost(int32, required, tag = "1")]
    pub node_id: i32,
    #[prost(int64, required, tag = "2")]
    pub version: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VectorClock {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<ClockEntry>,
    #[prost(int64, optional, tag = "2")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Versioned {
    #[prost(bytes = "vec", required, tag = "1")]
    pub value: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub version: Option<VectorClock>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionEntry {
    #[prost(bytes = "vec", required, tag = "1")]
    pub key: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub versioned: Option<Versioned>,
}

/// `(name, payload)` handle for a server-side stream predicate.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamFilter {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(bytes = "vec", required, tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorResponse {
    #[prost(uint32, required, tag = "1")]
    pub error_code: u32,
    #[prost(string, required, tag = "2")]
    pub error_message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetadataRequest {
    #[prost(bytes = "vec", required, tag = "1")]
    pub key: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetadataResponse {
    #[prost(message, optional, tag = "1")]
    pub version: Option<Versioned>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<ErrorResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateMetadataRequest {
    #[prost(bytes = "vec", required, tag = "1")]
    pub key: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub versioned: Option<Versioned>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateMetadataResponse {
    #[prost(message, optional, tag = "1")]
    pub error: Option<ErrorResponse>,
}

/// Streamed upload record. The first frame on the wire is a full
/// `AdminRequest` envelope wrapping one of these (with the filter, if any);
/// subsequent frames are bare records without a filter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatePartitionEntriesRequest {
    #[prost(string, required, tag = "1")]
    pub store: String,
    #[prost(message, optional, tag = "2")]
    pub partition_entry: Option<PartitionEntry>,
    #[prost(message, optional, tag = "3")]
    pub filter: Option<StreamFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdatePartitionEntriesResponse {
    #[prost(message, optional, tag = "1")]
    pub error: Option<ErrorResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchPartitionEntriesRequest {
    #[prost(int32, repeated, packed = "false", tag = "1")]
    pub partitions: Vec<i32>,
    #[prost(string, required, tag = "2")]
    pub store: String,
    #[prost(message, optional, tag = "3")]
    pub filter: Option<StreamFilter>,
    #[prost(bool, optional, tag = "4")]
    pub fetch_values: Option<bool>,
}

/// One download stream record: an entry when values were requested, a bare
/// key otherwise. An in-stream failure arrives as a record with `error` set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchPartitionEntriesResponse {
    #[prost(message, optional, tag = "1")]
    pub partition_entry: Option<PartitionEntry>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub key: Option<Vec<u8>>,
    #[prost(message, optional, tag = "3")]
    pub error: Option<ErrorResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePartitionEntriesRequest {
    #[prost(string, required, tag = "1")]
    pub store: String,
    #[prost(int32, repeated, packed = "false", tag = "2")]
    pub partitions: Vec<i32>,
    #[prost(message, optional, tag = "3")]
    pub filter: Option<StreamFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeletePartitionEntriesResponse {
    #[prost(int64, optional, tag = "1")]
    pub count: Option<i64>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<ErrorResponse>,
}

/// Sent to the stealer node; `node_id` names the donor to fetch from.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitiateFetchAndUpdateRequest {
    #[prost(int32, required, tag = "1")]
    pub node_id: i32,
    #[prost(int32, repeated, packed = "false", tag = "2")]
    pub partitions: Vec<i32>,
    #[prost(string, required, tag = "3")]
    pub store: String,
    #[prost(message, optional, tag = "4")]
    pub filter: Option<StreamFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AsyncOperationStatusRequest {
    #[prost(int32, required, tag = "1")]
    pub request_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AsyncOperationStatusResponse {
    #[prost(int32, optional, tag = "1")]
    pub request_id: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub description: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub status: Option<String>,
    #[prost(bool, optional, tag = "4")]
    pub complete: Option<bool>,
    #[prost(message, optional, tag = "5")]
    pub error: Option<ErrorResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdminRequest {
    #[prost(enumeration = "AdminRequestType", required, tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub get_metadata: Option<GetMetadataRequest>,
    #[prost(message, optional, tag = "3")]
    pub update_metadata: Option<UpdateMetadataRequest>,
    #[prost(message, optional, tag = "4")]
    pub update_partition_entries: Option<UpdatePartitionEntriesRequest>,
    #[prost(message, optional, tag = "5")]
    pub fetch_partition_entries: Option<FetchPartitionEntriesRequest>,
    #[prost(message, optional, tag = "6")]
    pub delete_partition_entries: Option<DeletePartitionEntriesRequest>,
    #[prost(message, optional, tag = "7")]
    pub initiate_fetch_and_update: Option<InitiateFetchAndUpdateRequest>,
    #[prost(message, optional, tag = "8")]
    pub async_operation_status: Option<AsyncOperationStatusRequest>,
}

impl AdminRequest {
    /// Empty envelope of the given type; callers fill in the sub-request.
    pub fn of_type(t: AdminRequestType) -> AdminRequest {
        AdminRequest {
            r#type: t as i32,
            ..Default::default()
        }
    }
}

/// Accessor for the error field shared by every admin response.
pub trait AdminResponse: prost::Message + Default {
    fn error(&self) -> Option<&ErrorResponse>;
}

macro_rules! admin_response {
    ($($ty:ty),* $(,)?) => {
        $(impl AdminResponse for $ty {
            fn error(&self) -> Option<&ErrorResponse> {
                self.error.as_ref()
            }
        })*
    };
}

admin_response!(
    GetMetadataResponse,
    UpdateMetadataResponse,
    UpdatePartitionEntriesResponse,
    FetchPartitionEntriesResponse,
    DeletePartitionEntriesResponse,
    AsyncOperationStatusResponse,
);

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn envelope_round_trips() {
        let request = AdminRequest {
            get_metadata: Some(GetMetadataRequest {
                key: b"cluster.xml".to_vec(),
            }),
            ..AdminRequest::of_type(AdminRequestType::GetMetadata)
        };

        let bytes = request.encode_to_vec();
        let decoded = AdminRequest::decode(&bytes[..]).unwrap();

        assert_eq!(decoded, request);
        assert_eq!(decoded.r#type, AdminRequestType::GetMetadata as i32);
    }

    #[test]
    fn error_field_is_uniformly_accessible() {
        let response = UpdateMetadataResponse {
            error: Some(ErrorResponse {
                error_code: 4,
                error_message: "obsolete version".to_string(),
            }),
        };

        let err = AdminResponse::error(&response).unwrap();
        assert_eq!(err.error_code, 4);
    }
}
