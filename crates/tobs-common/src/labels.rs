//! Label selectors for the workloads of a tobs release

use std::collections::BTreeMap;

/// Labels shared by every pod of a release
pub fn release_labels(release: &str) -> BTreeMap<String, String> {
    labels(&[("release", release)])
}

/// Labels of the TimescaleDB primary
pub fn timescaledb_master_labels(release: &str) -> BTreeMap<String, String> {
    labels(&[("release", release), ("role", "master")])
}

/// Labels of the Grafana pod
pub fn grafana_labels(release: &str) -> BTreeMap<String, String> {
    labels(&[
        ("app.kubernetes.io/instance", release),
        ("app.kubernetes.io/name", "grafana"),
    ])
}

/// Labels of the Prometheus server pod
pub fn prometheus_labels(release: &str) -> BTreeMap<String, String> {
    labels(&[
        ("release", release),
        ("app", "prometheus"),
        ("component", "server"),
    ])
}

/// Labels of the Promscale connector pod
pub fn promscale_labels(release: &str) -> BTreeMap<String, String> {
    let app = format!("{}-promscale", release);
    labels(&[("app", app.as_str())])
}

/// Labels of the PromLens pod
pub fn promlens_labels(release: &str) -> BTreeMap<String, String> {
    let app = format!("{}-promlens", release);
    labels(&[("app", app.as_str())])
}

/// Render labels as a Kubernetes label selector (`k1=v1,k2=v2`)
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_sorted_and_comma_joined() {
        assert_eq!(
            selector(&timescaledb_master_labels("tobs")),
            "release=tobs,role=master"
        );
        assert_eq!(
            selector(&grafana_labels("obs")),
            "app.kubernetes.io/instance=obs,app.kubernetes.io/name=grafana"
        );
    }

    #[test]
    fn promscale_app_label_embeds_release() {
        assert_eq!(selector(&promscale_labels("obs")), "app=obs-promscale");
        assert_eq!(selector(&promlens_labels("obs")), "app=obs-promlens");
    }

    #[test]
    fn empty_labels_give_empty_selector() {
        assert_eq!(selector(&BTreeMap::new()), "");
    }
}
