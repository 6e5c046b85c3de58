use ammonia::clean_text;

// 列表由 /dashboard/live 推送的快照在浏览器端渲染，这里只输出页面外壳

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 42rem; margin: 3rem auto; padding: 0 1rem; color: #1f2937; }}
header {{ display: flex; justify-content: space-between; align-items: center; }}
form.create {{ display: flex; gap: .5rem; margin: 1.5rem 0; }}
form.create input {{ flex: 1; padding: .5rem; }}
ul {{ list-style: none; padding: 0; }}
li {{ display: flex; justify-content: space-between; padding: .5rem 0; border-bottom: 1px solid #e5e7eb; }}
button {{ padding: .5rem 1rem; cursor: pointer; }}
.muted {{ color: #6b7280; }}
</style>
</head>
<body>
{body}
</body>
</html>"#,
        title = clean_text(title),
        body = body
    )
}

pub fn landing_page(provider: &str) -> String {
    let body = format!(
        r#"<main>
<h1>Smart Bookmark</h1>
<p class="muted">Save links and see them update live across every open tab.</p>
<a href="/auth/login"><button type="button">Sign in with {provider}</button></a>
</main>"#,
        provider = clean_text(&capitalize(provider))
    );
    page("Smart Bookmark", &body)
}

pub fn dashboard_page(display_name: &str) -> String {
    let body = format!(
        r#"<header>
<h1>My Bookmarks</h1>
<form method="post" action="/auth/logout">
<span class="muted">{user}</span>
<button type="submit">Sign out</button>
</form>
</header>
<form class="create" id="create-form">
<input id="title" name="title" placeholder="Title">
<input id="url" name="url" placeholder="https://example.com">
<button type="submit" id="save">Add</button>
</form>
<p id="status" class="muted">Loading...</p>
<ul id="bookmarks"></ul>
<script>{script}</script>"#,
        user = clean_text(display_name),
        script = DASHBOARD_SCRIPT
    );
    page("My Bookmarks", &body)
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const DASHBOARD_SCRIPT: &str = r#"
(function () {
  const scheme = location.protocol === "https:" ? "wss://" : "ws://";
  const socket = new WebSocket(scheme + location.host + "/dashboard/live");
  const form = document.getElementById("create-form");
  const title = document.getElementById("title");
  const url = document.getElementById("url");
  const save = document.getElementById("save");
  const list = document.getElementById("bookmarks");
  const status = document.getElementById("status");

  function text(value) {
    const span = document.createElement("span");
    span.textContent = value;
    return span;
  }

  function render(snapshot) {
    status.textContent = snapshot.loading ? "Loading..." :
      (snapshot.bookmarks.length === 0 ? "No bookmarks yet." : "");
    list.replaceChildren(...snapshot.bookmarks.map(function (b) {
      const item = document.createElement("li");
      const link = document.createElement("a");
      link.href = b.url;
      link.target = "_blank";
      link.rel = "noopener noreferrer";
      link.appendChild(text(b.title));
      const details = document.createElement("div");
      details.appendChild(link);
      details.appendChild(document.createElement("br"));
      details.appendChild(text(b.url));
      const remove = document.createElement("button");
      remove.textContent = "Delete";
      remove.onclick = function () { socket.send(JSON.stringify({ type: "delete", id: b.id })); };
      item.appendChild(details);
      item.appendChild(remove);
      return item;
    }));
  }

  socket.onmessage = function (event) {
    const message = JSON.parse(event.data);
    switch (message.type) {
      case "snapshot": render(message); break;
      case "saving": save.disabled = message.value; save.textContent = message.value ? "Saving..." : "Add"; break;
      case "alert": alert(message.message); break;
      case "form_cleared": title.value = ""; url.value = ""; break;
    }
  };

  socket.onclose = function () { status.textContent = "Disconnected. Reload to reconnect."; };

  form.onsubmit = function (event) {
    event.preventDefault();
    socket.send(JSON.stringify({ type: "create", title: title.value, url: url.value }));
  };
})();
"#;
