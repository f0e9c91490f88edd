//! Fire-and-log notification to the workload-token service once a DevID
//! certificate has been issued. Failure here never fails the client's
//! response, which has already been sent by the time this runs.

use log::warn;

pub async fn notify_workload_tokens(url: &str, xname: &str, node_type: &str) {
    let client = reqwest::Client::new();
    let form = [("xname", xname), ("type", node_type)];
    match client.post(url).form(&form).send().await {
        Ok(resp) if resp.status().is_success() => {}
        Ok(resp) => warn!(
            "workload-token notification for {xname} returned status {}",
            resp.status()
        ),
        Err(e) => warn!("workload-token notification for {xname} failed: {e}"),
    }
}
