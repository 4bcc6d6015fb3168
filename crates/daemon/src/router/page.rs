//! The index page served at the share root.
//!
//! A single self-contained HTML document: two panels that list the shared
//! and uploads areas through `browse`, and an upload form unless the share
//! is read-only.

/// Values substituted into the page.
#[derive(Debug, Clone)]
pub struct IndexPage<'a> {
    /// `/<token>` without a trailing slash.
    pub base: &'a str,
    pub remaining_ttl_minutes: u64,
    pub read_only: bool,
    pub max_upload_mb: u64,
    pub log_path: Option<&'a str>,
    pub share_url: Option<&'a str>,
}

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>LanShare</title>
<style>
* { box-sizing: border-box; }
body { font-family: system-ui, -apple-system, sans-serif; padding: 1rem; max-width: 960px; margin: 0 auto; background: #f5f5f5; }
header { display: flex; justify-content: space-between; align-items: center; border-bottom: 2px solid #333; padding-bottom: 0.5rem; margin-bottom: 1rem; }
h1 { margin: 0; font-size: 1.5rem; }
h2 { margin: 0 0 0.75rem 0; font-size: 1.2rem; }
.ttl { background: #333; color: #fff; padding: 0.25rem 0.75rem; border-radius: 4px; font-size: 0.9rem; }
section { margin: 1rem 0; padding: 1rem; background: #fff; border: 1px solid #ddd; border-radius: 8px; }
.breadcrumb { font-size: 0.85rem; margin-bottom: 0.5rem; color: #666; }
.breadcrumb a { color: #0066cc; text-decoration: none; }
.file-list { border: 1px solid #eee; border-radius: 4px; max-height: 350px; overflow-y: auto; }
.file-item { display: flex; align-items: center; padding: 0.5rem 0.75rem; border-bottom: 1px solid #f0f0f0; }
.file-item.dir { cursor: pointer; }
.file-item.dir:hover { background: #e8f4ff; }
.file-name { flex: 1; overflow: hidden; text-overflow: ellipsis; white-space: nowrap; }
.file-size { color: #666; font-size: 0.85rem; padding: 0 1rem; }
.btn { padding: 0.25rem 0.75rem; border: 1px solid #0066cc; background: #fff; color: #0066cc; border-radius: 4px; cursor: pointer; text-decoration: none; font-size: 0.85rem; }
.upload-form { display: flex; gap: 0.5rem; margin-top: 1rem; flex-wrap: wrap; }
.upload-info, footer { font-size: 0.8rem; color: #666; margin-top: 0.5rem; }
.readonly-badge { background: #ff9800; color: #fff; padding: 0.15rem 0.5rem; border-radius: 3px; font-size: 0.75rem; }
.empty, .loading { padding: 1rem; text-align: center; color: #999; }
.error { color: #d32f2f; padding: 0.5rem; background: #ffebee; }
</style>
</head>
<body>
<header>
<h1>LanShare</h1>
<span class="ttl" id="ttl">TTL: __TTL__m</span>
</header>
<section>
<h2>Shared Files</h2>
<nav class="breadcrumb" id="shared-breadcrumb">/</nav>
<div class="file-list" id="shared-list"><div class="loading">Loading...</div></div>
</section>
<section>
<h2>Uploads __READONLY_BADGE__</h2>
<nav class="breadcrumb" id="uploads-breadcrumb">/</nav>
<div class="file-list" id="uploads-list"><div class="loading">Loading...</div></div>
__UPLOAD_FORM__
</section>
<footer>__FOOTER__</footer>
<script>
const BASE = '__BASE__';
const READONLY = __READONLY__;
const state = { shared: '', uploads: '' };

function escapeHtml(text) {
  const div = document.createElement('div');
  div.textContent = text;
  return div.innerHTML;
}

function formatSize(bytes) {
  if (bytes === 0) return '0 B';
  const units = ['B', 'KB', 'MB', 'GB', 'TB'];
  const i = Math.min(Math.floor(Math.log(bytes) / Math.log(1024)), units.length - 1);
  return parseFloat((bytes / Math.pow(1024, i)).toFixed(1)) + ' ' + units[i];
}

function dirLink(area, path, label) {
  const a = document.createElement('a');
  a.href = '#';
  a.textContent = label;
  a.onclick = (e) => { e.preventDefault(); loadDir(area, path); };
  return a;
}

function renderBreadcrumb(area, path) {
  const nav = document.getElementById(area + '-breadcrumb');
  nav.replaceChildren(dirLink(area, '', 'Root'));
  let current = '';
  for (const part of path.split('/').filter(p => p)) {
    current += (current ? '/' : '') + part;
    nav.append(' / ', dirLink(area, current, part));
  }
}

function renderList(area, data) {
  const list = document.getElementById(area + '-list');
  const endpoint = area === 'shared' ? 'dl' : 'udl';
  list.replaceChildren();
  const row = (cls) => { const d = document.createElement('div'); d.className = cls; list.append(d); return d; };

  if (data.path) {
    const parent = data.path.split('/').slice(0, -1).join('/');
    const d = row('file-item dir');
    d.innerHTML = '<span class="file-name">..</span>';
    d.onclick = () => loadDir(area, parent);
  }
  for (const dir of data.directories) {
    const d = row('file-item dir');
    d.innerHTML = '<span class="file-name">' + escapeHtml(dir.name) + '/</span>';
    d.onclick = () => loadDir(area, dir.path);
  }
  for (const file of data.files) {
    const d = row('file-item');
    const url = BASE + '/' + endpoint + '?path=' + encodeURIComponent(file.path);
    d.innerHTML = '<span class="file-name">' + escapeHtml(file.name) + '</span>'
      + '<span class="file-size">' + formatSize(file.size) + '</span>'
      + '<a class="btn" download href="' + escapeHtml(url) + '">Download</a>';
  }
  if (!list.children.length) {
    row('empty').textContent = 'No files';
  }
}

async function loadDir(area, path) {
  const list = document.getElementById(area + '-list');
  try {
    const res = await fetch(BASE + '/browse?area=' + area + '&path=' + encodeURIComponent(path));
    const data = await res.json();
    if (!res.ok) throw new Error(data.error || ('Failed to load: ' + res.status));
    state[area] = path;
    renderBreadcrumb(area, path);
    renderList(area, data);
  } catch (e) {
    list.innerHTML = '<div class="error">' + escapeHtml(e.message) + '</div>';
  }
}

async function refreshStatus() {
  try {
    const res = await fetch(BASE + '/status');
    if (res.ok) {
      const status = await res.json();
      document.getElementById('ttl').textContent = 'TTL: ' + status.remaining_ttl_minutes + 'm';
    }
  } catch (e) {
    document.getElementById('ttl').textContent = 'Session ended';
  }
}

if (!READONLY) {
  document.getElementById('upload-form').addEventListener('submit', async (e) => {
    e.preventDefault();
    const input = document.getElementById('file-input');
    if (input.files.length === 0) return;
    const form = new FormData();
    for (const file of input.files) form.append('file', file);
    try {
      const res = await fetch(BASE + '/upload?path=' + encodeURIComponent(state.uploads), { method: 'POST', body: form });
      const result = await res.json();
      if (result.success) {
        alert('Uploaded: ' + result.files.map(f => f.saved).join(', '));
        input.value = '';
        loadDir('uploads', state.uploads);
      } else {
        alert('Upload failed: ' + (result.error || 'Unknown error'));
      }
    } catch (e) {
      alert('Upload error: ' + e.message);
    }
  });
}

loadDir('shared', '');
loadDir('uploads', '');
setInterval(refreshStatus, 60000);
</script>
</body>
</html>
"#;

/// Minimal HTML escaping for text and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl IndexPage<'_> {
    /// Render the page.
    pub fn render(&self) -> String {
        let badge = if self.read_only {
            r#"<span class="readonly-badge">READ ONLY</span>"#.to_string()
        } else {
            String::new()
        };

        let form = if self.read_only {
            String::new()
        } else {
            format!(
                r#"<form id="upload-form" class="upload-form" enctype="multipart/form-data">
<input type="file" name="file" id="file-input" multiple>
<button type="submit" class="btn">Upload</button>
</form>
<div class="upload-info">Max upload size: {} MB</div>"#,
                self.max_upload_mb
            )
        };

        let mut footer = Vec::new();
        if let Some(log) = self.log_path {
            footer.push(format!("<div>Log: {}</div>", escape_html(log)));
        }
        if let Some(url) = self.share_url {
            footer.push(format!("<div>URL: {}</div>", escape_html(url)));
        }

        TEMPLATE
            .replace("__TTL__", &self.remaining_ttl_minutes.to_string())
            .replace("__READONLY_BADGE__", &badge)
            .replace("__UPLOAD_FORM__", &form)
            .replace("__FOOTER__", &footer.join("\n"))
            .replace("__BASE__", &escape_html(self.base))
            .replace("__READONLY__", if self.read_only { "true" } else { "false" })
    }
}
