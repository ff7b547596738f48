//! HTML pages and static assets.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::backend::CompileRecord;
use crate::runner::JobSummary;

/// Which front end a request's Host header selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Compile,
    Play,
}

/// What the compile page knows about a path.
pub struct PageVars<'a> {
    pub path: &'a str,
    /// Host the page was requested on; the socket connects back to it.
    pub host: &'a str,
    pub secure: bool,
    pub index_host: &'a str,
    pub pkg_host: &'a str,
    pub last: Option<&'a CompileRecord>,
    pub recent: Option<&'a JobSummary>,
}

/// Static assets served from the assets directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Favicon,
    Stylesheet,
}

impl Asset {
    pub fn file_name(self) -> &'static str {
        match self {
            Asset::Favicon => "favicon.ico",
            Asset::Stylesheet => "compile.css",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Asset::Favicon => "image/x-icon",
            Asset::Stylesheet => "text/css",
        }
    }

    pub async fn load(self, assets_dir: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(assets_dir.join(self.file_name())).await
    }
}

/// Escape text for inclusion in HTML content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn describe_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn status_line(vars: &PageVars<'_>) -> String {
    if let Some(summary) = vars.recent.filter(|summary| !summary.is_success()) {
        let error = summary.error.as_deref().unwrap_or_default();
        return format!(
            "last attempt failed at {}: {}",
            describe_time(summary.time),
            escape_html(error)
        );
    }
    match vars.last {
        Some(record) => format!("was compiled {}", describe_time(record.time)),
        None => String::new(),
    }
}

pub fn render_compile_page(vars: &PageVars<'_>) -> String {
    let path = escape_html(vars.path);
    let host = escape_html(vars.host);
    let index_host = escape_html(vars.index_host);
    let pkg_host = escape_html(vars.pkg_host);
    let scheme = if vars.secure { "wss" } else { "ws" };
    let status = status_line(vars);

    format!(
        r##"<html>
	<head>
		<meta charset="utf-8">
		<title>Compile {path}</title>
		<link href="/compile.css" rel="stylesheet">
	</head>
	<body>
		<h1>Compile</h1>
		<p class="lead">{path} <span id="status">{status}</span></p>
		<p><a href="#" id="btn">Compile</a></p>
		<ul id="progress"></ul>
		<p id="complete" style="display: none;">
			<a id="link" href="#"></a>
			<input id="script" readonly>
		</p>
		<pre id="error" style="display: none;"></pre>
		<script>
			document.getElementById("btn").onclick = function (event) {{
				event.preventDefault();
				var progress = document.getElementById("progress");
				var socket = new WebSocket("{scheme}://{host}/_ws/{path}");
				socket.onmessage = function (event) {{
					var envelope = JSON.parse(event.data);
					var message = envelope.message;
					switch (envelope.type) {{
					case "Complete":
						var link = document.getElementById("link");
						link.href = "https://{index_host}/" + message.short;
						link.textContent = "{index_host}/" + message.short;
						document.getElementById("script").value =
							"https://{pkg_host}/" + message.path + "." + message.hashmin + ".js";
						document.getElementById("complete").style.display = "";
						break;
					case "Error":
						var error = document.getElementById("error");
						error.textContent = message.message;
						error.style.display = "";
						break;
					default:
						var item = document.createElement("li");
						item.textContent = envelope.type + ": " + JSON.stringify(message);
						progress.appendChild(item);
					}}
				}};
			}};
		</script>
	</body>
</html>
"##
    )
}

pub fn render_play_page(host: &str, secure: bool) -> String {
    let host = escape_html(host);
    let scheme = if secure { "wss" } else { "ws" };
    format!(
        r#"<html>
	<head>
		<meta charset="utf-8">
		<title>Playground</title>
		<link href="/compile.css" rel="stylesheet">
	</head>
	<body data-socket="{scheme}://{host}/_pg/">
		<h1>Playground</h1>
		<p>Send one instruction over <code>{scheme}://{host}/_pg/&lt;path&gt;</code>.</p>
	</body>
</html>
"#
    )
}
