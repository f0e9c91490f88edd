//! Fetches a JWT-SVID from the SPIFFE Workload API over a Unix domain
//! socket. The Workload API requires the `workload.spiffe.io: true`
//! metadata header on every call; omitting it is treated by the API server
//! as a malformed request.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Request;

pub mod proto {
    tonic::include_proto!("spiffe.workload_api");
}

use proto::spiffe_workload_api_client::SpiffeWorkloadApiClient;
use proto::JwtsvidRequest;

const AUDIENCE: &str = "system-compute";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn fetch_jwt(socket_path: &str) -> Result<String> {
    let socket_path = socket_path.to_string();
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                let stream = tokio::net::UnixStream::connect(socket_path).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
            }
        }))
        .await
        .context("connecting to SPIFFE workload API socket")?;

    fetch_jwt_over_channel(channel).await
}

async fn fetch_jwt_over_channel(channel: Channel) -> Result<String> {
    let mut client = SpiffeWorkloadApiClient::new(channel);

    let mut request = Request::new(JwtsvidRequest {
        audience: vec![AUDIENCE.to_string()],
        spiffe_id: String::new(),
    });
    request
        .metadata_mut()
        .insert("workload.spiffe.io", "true".parse().unwrap());

    let response = tokio::time::timeout(FETCH_TIMEOUT, client.fetch_jwtsvid(request))
        .await
        .context("fetching JWT-SVID timed out")?
        .context("fetching JWT-SVID failed")?
        .into_inner();

    match response.svids.into_iter().next() {
        Some(svid) => Ok(svid.svid),
        None => bail!("workload API returned no JWT-SVID"),
    }
}
