//! Derives the canonical RTSP pull URL from a user-supplied push URL
//! (RTMP/SRT/WHIP), per §6's URL normalization table.

/// Derive `pull_url` from a user-supplied network camera `url`.
///
/// `rtsp_port` overrides the default 8554 (settable via
/// `VIDEOMEMORY_RTSP_PULL_PORT`, §6).
pub fn derive_pull_url(url: &str, rtsp_port: u16) -> String {
    if let Some(rest) = url.strip_prefix("rtmp://") {
        if let Some((host, path)) = split_host_and_path(rest) {
            return format!("rtsp://{host}:{rtsp_port}{path}");
        }
    }

    if let Some(rest) = url.strip_prefix("srt://") {
        if let Some((host, query)) = rest.split_once('?') {
            if let Some(key) = extract_streamid_key(query) {
                let host = host.split('/').next().unwrap_or(host);
                let host = strip_port(host);
                return format!("rtsp://{host}:{rtsp_port}/{key}");
            }
        }
    }

    if let Some(rest) = url.strip_prefix("whip://") {
        if let Some((host, path)) = split_host_and_path(rest) {
            return format!("rtsp://{host}:{rtsp_port}{path}");
        }
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        if let Some(without_scheme) = url.splitn(2, "://").nth(1) {
            if let Some((host_and_path, _)) = without_scheme.split_once('?').map(|(a, _)| (a, ())).or(Some((without_scheme, ()))) {
                if let Some(path) = host_and_path.find('/').map(|i| &host_and_path[i..]) {
                    if let Some(trimmed) = path.strip_suffix("/whip") {
                        let host = strip_port(&host_and_path[..host_and_path.len() - path.len()]);
                        return format!("rtsp://{host}:{rtsp_port}{trimmed}");
                    }
                }
            }
        }
    }

    url.to_string()
}

/// Split `host:port/path` into `(host, "/path")`, dropping any port.
fn split_host_and_path(rest: &str) -> Option<(String, String)> {
    let slash = rest.find('/')?;
    let host_port = &rest[..slash];
    let path = &rest[slash..];
    Some((strip_port(host_port), path.to_string()))
}

fn strip_port(host_port: &str) -> String {
    host_port.split(':').next().unwrap_or(host_port).to_string()
}

/// Extract `K` from a `streamid=publish:K` query parameter.
fn extract_streamid_key(query: &str) -> Option<String> {
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == "streamid" {
            return v.split_once(':').map(|(_, k)| k.to_string()).or(Some(v.to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtmp_is_rewritten_to_rtsp() {
        assert_eq!(
            derive_pull_url("rtmp://cam.local:1935/live/front", 8554),
            "rtsp://cam.local:8554/live/front"
        );
    }

    #[test]
    fn srt_streamid_becomes_rtsp_path() {
        assert_eq!(
            derive_pull_url("srt://cam.local:8890?streamid=publish:live/front", 8554),
            "rtsp://cam.local:8554/live/front"
        );
    }

    #[test]
    fn whip_is_rewritten_to_rtsp() {
        assert_eq!(
            derive_pull_url("whip://cam.local:8889/front", 8554),
            "rtsp://cam.local:8554/front"
        );
    }

    #[test]
    fn http_whip_suffix_is_rewritten_to_rtsp() {
        assert_eq!(
            derive_pull_url("https://cam.local:8889/front/whip", 8554),
            "rtsp://cam.local:8554/front"
        );
    }

    #[test]
    fn unrecognized_scheme_is_unchanged() {
        assert_eq!(derive_pull_url("rtsp://cam.local:554/front", 8554), "rtsp://cam.local:554/front");
    }

    #[test]
    fn custom_rtsp_port_is_honored() {
        assert_eq!(
            derive_pull_url("rtmp://cam.local/live", 9000),
            "rtsp://cam.local:9000/live"
        );
    }
}
