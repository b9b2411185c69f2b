use std::{io, time::SystemTime};

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    error::{ProvideErrorMetadata, SdkError},
    operation::{get_object::GetObjectOutput, head_object::HeadObjectOutput},
    primitives::{ByteStream, DateTime},
};
use axum::http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{
        ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LANGUAGE,
        CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, EXPIRES, LAST_MODIFIED,
    },
};
use futures::{StreamExt, stream};
use tokio::time::{Instant, timeout_at};

use crate::{config::OriginSettings, util::http_date};

use super::{Conditional, ObjectBody, ObjectPayload, ObjectStore, OriginError};

const METADATA_HEADER_PREFIX: &str = "x-amz-meta-";

/// S3-compatible [`ObjectStore`] built on the AWS SDK with path-style
/// addressing and static credentials, pointed at a custom endpoint.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    request_timeout: std::time::Duration,
}

impl S3ObjectStore {
    pub async fn new(settings: &OriginSettings) -> Self {
        let credentials = Credentials::from_keys(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
        );
        let base = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base).force_path_style(true);
        if !settings.endpoint.is_empty() {
            builder = builder.endpoint_url(settings.endpoint.clone());
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
            request_timeout: settings.request_timeout,
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str, cond: &Conditional) -> Result<ObjectPayload, OriginError> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(if_none_match) = &cond.if_none_match {
            request = request.if_none_match(if_none_match);
        }
        if let Some(if_modified_since) = cond.if_modified_since {
            request = request.if_modified_since(DateTime::from(if_modified_since));
        }
        if let Some(range) = &cond.range {
            request = request.range(range);
        }

        let deadline = Instant::now() + self.request_timeout;
        let output = match timeout_at(deadline, request.send()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(translate_error(err)),
            Err(elapsed) => return Err(OriginError::Transport(Box::new(elapsed))),
        };

        Ok(to_payload(output, deadline))
    }

    async fn head(&self, key: &str, cond: &Conditional) -> Result<ObjectPayload, OriginError> {
        let mut request = self.client.head_object().bucket(&self.bucket).key(key);
        if let Some(if_none_match) = &cond.if_none_match {
            request = request.if_none_match(if_none_match);
        }
        if let Some(if_modified_since) = cond.if_modified_since {
            request = request.if_modified_since(DateTime::from(if_modified_since));
        }

        let deadline = Instant::now() + self.request_timeout;
        let output = match timeout_at(deadline, request.send()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(translate_error(err)),
            Err(elapsed) => return Err(OriginError::Transport(Box::new(elapsed))),
        };

        Ok(to_head_payload(output))
    }
}

fn to_payload(output: GetObjectOutput, deadline: Instant) -> ObjectPayload {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, CONTENT_TYPE, output.content_type());
    set_header(&mut headers, CACHE_CONTROL, output.cache_control());
    set_header(
        &mut headers,
        LAST_MODIFIED,
        format_instant(output.last_modified()).as_deref(),
    );
    set_header(&mut headers, ETAG, output.e_tag());
    set_header(&mut headers, CONTENT_ENCODING, output.content_encoding());
    set_header(&mut headers, ACCEPT_RANGES, output.accept_ranges());
    set_header(&mut headers, CONTENT_RANGE, output.content_range());
    set_header(
        &mut headers,
        CONTENT_DISPOSITION,
        output.content_disposition(),
    );
    set_header(&mut headers, CONTENT_LANGUAGE, output.content_language());
    set_header(&mut headers, EXPIRES, output.expires_string());
    set_metadata_headers(&mut headers, output.metadata());

    let content_length = output.content_length().unwrap_or(0);
    if output.content_length().is_some() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
    }

    // A partial origin response keeps its Content-Range and is surfaced as
    // 206 so the proxy never misrepresents a range as the full object.
    let status = if output.content_range().is_some_and(|range| !range.is_empty()) {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let etag = output.e_tag().unwrap_or_default().to_string();
    let last_modified = to_system_time(output.last_modified());
    let body = output.body;

    ObjectPayload {
        body: Some(deadline_stream(body, deadline)),
        headers,
        status,
        content_length,
        etag,
        last_modified,
    }
}

fn to_head_payload(output: HeadObjectOutput) -> ObjectPayload {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, CONTENT_TYPE, output.content_type());
    set_header(&mut headers, CACHE_CONTROL, output.cache_control());
    set_header(
        &mut headers,
        LAST_MODIFIED,
        format_instant(output.last_modified()).as_deref(),
    );
    set_header(&mut headers, ETAG, output.e_tag());
    set_header(&mut headers, CONTENT_ENCODING, output.content_encoding());
    set_header(&mut headers, ACCEPT_RANGES, output.accept_ranges());
    set_header(
        &mut headers,
        CONTENT_DISPOSITION,
        output.content_disposition(),
    );
    set_header(&mut headers, CONTENT_LANGUAGE, output.content_language());
    set_header(&mut headers, EXPIRES, output.expires_string());
    set_metadata_headers(&mut headers, output.metadata());

    ObjectPayload {
        body: None,
        headers,
        status: StatusCode::OK,
        content_length: output.content_length().unwrap_or(0),
        etag: output.e_tag().unwrap_or_default().to_string(),
        last_modified: to_system_time(output.last_modified()),
    }
}

/// Bind the transfer to the per-request deadline: reads past it fail, and
/// dropping the stream cancels whatever is still in flight upstream.
fn deadline_stream(body: ByteStream, deadline: Instant) -> ObjectBody {
    stream::try_unfold(body, move |mut body| async move {
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "origin read deadline exceeded",
            ));
        }
        match timeout_at(deadline, body.try_next()).await {
            Ok(Ok(chunk)) => Ok(chunk.map(|bytes| (bytes, body))),
            Ok(Err(err)) => Err(io::Error::other(err)),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "origin read deadline exceeded",
            )),
        }
    })
    .boxed()
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: Option<&str>) {
    let Some(value) = value else { return };
    if value.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn set_metadata_headers(
    headers: &mut HeaderMap,
    metadata: Option<&std::collections::HashMap<String, String>>,
) {
    let Some(metadata) = metadata else { return };
    for (key, value) in metadata {
        let name = format!("{METADATA_HEADER_PREFIX}{}", key.to_ascii_lowercase());
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}

fn format_instant(value: Option<&DateTime>) -> Option<String> {
    to_system_time(value).and_then(http_date::format)
}

fn to_system_time(value: Option<&DateTime>) -> Option<SystemTime> {
    value.and_then(|instant| SystemTime::try_from(*instant).ok())
}

fn translate_error<E>(err: SdkError<E>) -> OriginError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err.code() {
        Some("NotFound" | "NoSuchKey" | "NoSuchBucket" | "404") => return OriginError::NotFound,
        Some("NotModified") => return OriginError::NotModified,
        Some("PreconditionFailed") => return OriginError::Precondition,
        _ => {}
    }

    // Conditional-request outcomes (304/412) surface from the SDK as
    // unmodeled service errors; classify them by wire status.
    if let SdkError::ServiceError(context) = &err {
        match context.raw().status().as_u16() {
            304 => return OriginError::NotModified,
            404 => return OriginError::NotFound,
            412 => return OriginError::Precondition,
            _ => {}
        }
    }

    OriginError::Transport(Box::new(err))
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn deadline_stream_yields_all_chunks() {
        let body = ByteStream::from_static(b"hello world");
        let deadline = Instant::now() + std::time::Duration::from_secs(5);

        let collected: Vec<_> = deadline_stream(body, deadline)
            .try_collect()
            .await
            .expect("stream within deadline");
        let flattened: Vec<u8> = collected.concat();
        assert_eq!(flattened, b"hello world");
    }

    #[tokio::test]
    async fn deadline_stream_times_out_past_deadline() {
        let body = ByteStream::from_static(b"hello world");
        let deadline = Instant::now();

        let mut stream = deadline_stream(body, deadline);
        let err = stream
            .try_next()
            .await
            .expect_err("deadline already passed");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
