//! コンテナ詳細の書き換え
//!
//! inspectのボディはバイト列のまま加工し、エンジンが返すフィールドは
//! モデル化の有無にかかわらずそのままクライアントへ届ける。

use fleet_common::types::WILDCARD_HOST_IP;

/// トップレベルの `"Name"` キーの前に `"Node":<node_json>,` を差し込み、
/// ワイルドカードの `HostIp` をすべて `node_ip` に置き換える
pub fn rewrite_inspect_body(raw: &[u8], node_json: &[u8], node_ip: &str) -> Vec<u8> {
    let mut body = match find_top_level_name(raw) {
        Some(at) => {
            let mut out = Vec::with_capacity(raw.len() + node_json.len() + 8);
            out.extend_from_slice(&raw[..at]);
            out.extend_from_slice(b"\"Node\":");
            out.extend_from_slice(node_json);
            out.push(b',');
            out.extend_from_slice(&raw[at..]);
            out
        }
        None => raw.to_vec(),
    };

    let wildcard = format!("\"HostIp\":\"{}\"", WILDCARD_HOST_IP);
    let concrete = format!("\"HostIp\":\"{}\"", node_ip);
    body = replace_all(&body, wildcard.as_bytes(), concrete.as_bytes());
    body
}

/// トップレベルの `"Name":"/...` メンバーの開始引用符の位置
fn find_top_level_name(raw: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in raw.iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            b'"' => {
                if depth == 1 && is_name_member(&raw[i..]) {
                    return Some(i);
                }
                in_string = true;
            }
            _ => {}
        }
    }
    None
}

/// `"Name"`, optional whitespace, `:`, optional whitespace, `"/`
fn is_name_member(rest: &[u8]) -> bool {
    let Some(rest) = rest.strip_prefix(b"\"Name\"") else {
        return false;
    };
    let rest = skip_whitespace(rest);
    let Some(rest) = rest.strip_prefix(b":") else {
        return false;
    };
    skip_whitespace(rest).starts_with(b"\"/")
}

fn skip_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = rest.windows(needle.len()).position(|w| w == needle) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(replacement);
        rest = &rest[pos + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}
