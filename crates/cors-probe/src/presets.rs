//! Built-in request scripts and target endpoints offered to drivers.
//!
//! Scripts contain an `<APIURL>` placeholder replaced with the configured API
//! base URL plus the chosen endpoint path.

use serde::Serialize;

pub const API_URL_PLACEHOLDER: &str = "<APIURL>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preset {
    pub key: &'static str,
    pub name: &'static str,
    #[serde(skip)]
    pub script: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub path: &'static str,
}

pub const PRESETS: &[Preset] = &[
    Preset {
        key: "get",
        name: "GET",
        script: r#"const req = new XMLHttpRequest();
req.addEventListener("load", function () {
    console.log(this.responseText);
});
req.addEventListener("error", function () {
    console.error("Request failed");
});
req.open("GET", "<APIURL>");
req.send();"#,
    },
    Preset {
        key: "post",
        name: "POST",
        script: r#"const req = new XMLHttpRequest();
req.addEventListener("load", function () {
    console.log(this.responseText);
});
req.addEventListener("error", function () {
    console.error("Request failed");
});
req.open("POST", "<APIURL>");
req.setRequestHeader("Content-Type", "text/plain");
req.send("ping");"#,
    },
    Preset {
        key: "with-authorized-header",
        name: "With authorized header",
        script: r#"const req = new XMLHttpRequest();
req.addEventListener("load", function () {
    console.log(this.responseText);
});
req.addEventListener("error", function () {
    console.error("Request failed");
});
req.open("PUT", "<APIURL>");
req.setRequestHeader("x-custom-header", "value");
req.send();"#,
    },
    Preset {
        key: "with-custom-authorized-header",
        name: "With custom header",
        script: r#"const req = new XMLHttpRequest();
req.addEventListener("load", function () {
    console.log(this.responseText);
});
req.addEventListener("error", function () {
    console.error("Request failed");
});
req.open("PUT", "<APIURL>");
req.setRequestHeader("x-other-custom-header", "value");
req.send();"#,
    },
    Preset {
        key: "with-credentials",
        name: "With credentials",
        script: r#"const req = new XMLHttpRequest();
req.withCredentials = true;
req.addEventListener("load", function () {
    console.log(this.responseText);
});
req.addEventListener("error", function () {
    console.error("Request failed");
});
req.open("GET", "<APIURL>");
req.send();"#,
    },
];

pub const ENDPOINTS: &[Endpoint] = &[
    Endpoint { path: "/allorigins" },
    Endpoint { path: "/restricted" },
    Endpoint { path: "/closed" },
];

pub fn find(key: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.key == key)
}

/// Script for `key` aimed at `api_url` + `endpoint`, or `None` for unknown
/// presets.
pub fn render(key: &str, api_url: &str, endpoint: &str) -> Option<String> {
    let preset = find(key)?;
    let target = format!("{}{endpoint}", api_url.trim_end_matches('/'));
    Some(preset.script.replace(API_URL_PLACEHOLDER, &target))
}
