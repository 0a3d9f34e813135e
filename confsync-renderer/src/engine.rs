//! Per-resource template engine assembly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tera::{Context, Tera, Value};

use confsync_core::Config;

use crate::error::{io_err, RenderError};
use crate::kv::SharedStore;
use crate::{crypt, funcs, kv};

/// Template engine bound to one resource's snapshot and the configured
/// function extensions.
///
/// Templates are parsed per render, so a descriptor cycle always sees the
/// current template source on disk.
pub struct TemplateEngine {
    store: SharedStore,
    pgp_private_key: Option<Arc<Vec<u8>>>,
    func_map: Vec<(String, Arc<dyn tera::Function>)>,
    func_map_updaters: Vec<confsync_core::config::FuncMapUpdater>,
}

impl TemplateEngine {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            pgp_private_key: config.pgp_private_key.clone().map(Arc::new),
            func_map: config.func_map.clone(),
            func_map_updaters: config.func_map_updaters.clone(),
        }
    }

    /// Whether the decrypting `c*` functions are registered.
    pub fn crypt_enabled(&self) -> bool {
        self.pgp_private_key.is_some()
    }

    /// Parse and execute the template at `src` against the bound snapshot.
    pub fn render_file(&self, src: &Path) -> Result<String, RenderError> {
        let contents = std::fs::read_to_string(src).map_err(|err| io_err(src, err))?;
        let name = src
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("template");
        self.render_str(name, &contents)
    }

    /// Execute template `contents` registered under `name`.
    pub fn render_str(&self, name: &str, contents: &str) -> Result<String, RenderError> {
        let tera = self.build(name, contents)?;
        Ok(tera.render(name, &Context::new())?)
    }

    /// Render a command template over a `{ src: stage_path }` context.
    pub fn render_command(cmd: &str, src: &Path) -> Result<String, RenderError> {
        let mut context = Context::new();
        context.insert("src", &src.display().to_string());
        Ok(Tera::one_off(cmd, &context, false)?)
    }

    fn build(&self, name: &str, contents: &str) -> Result<Tera, RenderError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(name, contents)?;

        funcs::register(&mut tera);
        kv::register(&mut tera, &self.store);
        if let Some(private_key) = &self.pgp_private_key {
            crypt::register(&mut tera, &self.store, private_key);
        }
        for (func_name, function) in &self.func_map {
            tera.register_function(func_name, SharedFunction(function.clone()));
        }
        for updater in &self.func_map_updaters {
            updater(&mut tera);
        }
        Ok(tera)
    }
}

struct SharedFunction(Arc<dyn tera::Function>);

impl tera::Function for SharedFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        self.0.call(args)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::RwLock;

    use confsync_core::KvStore;

    use super::*;

    fn engine_with(pairs: &[(&str, &str)], config: &Config) -> TemplateEngine {
        let mut store = KvStore::new();
        for (key, value) in pairs {
            store.set(key, *value);
        }
        TemplateEngine::new(Arc::new(RwLock::new(store)), config)
    }

    fn render(template: &str, pairs: &[(&str, &str)]) -> Result<String, RenderError> {
        engine_with(pairs, &Config::default()).render_str("test", template)
    }

    fn render_ok(template: &str, pairs: &[(&str, &str)]) -> String {
        render(template, pairs).expect("render")
    }

    fn error_chain(err: &dyn std::error::Error) -> String {
        let mut out = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }

    // ─── Snapshot access ───────────────────────────────────────────────────

    #[test]
    fn getv_reads_the_snapshot() {
        let out = render_ok(r#"port={{ getv(key="/port") }}"#, &[("/port", "8080")]);
        assert_eq!(out, "port=8080");
    }

    #[test]
    fn getv_uses_default_for_missing_key() {
        let out = render_ok(r#"{{ getv(key="/nope", default="fallback") }}"#, &[]);
        assert_eq!(out, "fallback");
    }

    #[test]
    fn getv_without_default_fails_on_missing_key() {
        let err = render(r#"{{ getv(key="/nope") }}"#, &[]).expect_err("missing key");
        assert!(
            error_chain(&err).contains("does not exist"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn get_exposes_key_and_value_fields() {
        let out = render_ok(
            r#"{% set pair = get(key="/a") %}{{ pair.key }}={{ pair.value }}"#,
            &[("/a", "1")],
        );
        assert_eq!(out, "/a=1");
    }

    #[test]
    fn gets_returns_pairs_sorted_by_key() {
        let out = render_ok(
            r#"{% for pair in gets(pattern="/up/*") %}{{ pair.value }},{% endfor %}"#,
            &[("/up/b", "2"), ("/up/a", "1")],
        );
        assert_eq!(out, "1,2,");
    }

    #[test]
    fn getvs_exists_ls_and_lsdir() {
        let pairs = [("/svc/web/a", "1"), ("/svc/db", "2")];
        assert_eq!(
            render_ok(r#"{{ getvs(pattern="/svc/*") | join(sep=",") }}"#, &pairs),
            "2",
        );
        assert_eq!(
            render_ok(r#"{{ exists(key="/svc/db") }}|{{ exists(key="/svc/gone") }}"#, &pairs),
            "true|false",
        );
        assert_eq!(
            render_ok(r#"{{ ls(path="/svc") | join(sep=",") }}"#, &pairs),
            "db,web",
        );
        assert_eq!(
            render_ok(r#"{{ lsdir(path="/svc") | join(sep=",") }}"#, &pairs),
            "web",
        );
    }

    // ─── Utility functions ─────────────────────────────────────────────────

    #[test]
    fn string_helpers() {
        assert_eq!(
            render_ok(r#"{{ join(values=split(s="a,b", sep=","), sep="-") }}"#, &[]),
            "a-b",
        );
        assert_eq!(render_ok(r#"{{ toUpper(s="up") }}{{ toLower(s="DN") }}"#, &[]), "UPdn");
        assert_eq!(
            render_ok(r#"{{ contains(s="haystack", substr="hay") }}"#, &[]),
            "true",
        );
        assert_eq!(
            render_ok(r#"{{ trimSuffix(s="file.conf", suffix=".conf") }}"#, &[]),
            "file",
        );
        assert_eq!(render_ok(r#"{{ base(path="/a/b/c") }}:{{ dir(path="/a/b/c") }}"#, &[]), "c:/a/b");
    }

    #[test]
    fn replace_honors_the_count() {
        assert_eq!(
            render_ok(r#"{{ replace(s="aaa", old="a", new="b", n=1) }}"#, &[]),
            "baa",
        );
        assert_eq!(
            render_ok(r#"{{ replace(s="aaa", old="a", new="b", n=-1) }}"#, &[]),
            "bbb",
        );
    }

    #[test]
    fn arithmetic_and_parsing() {
        assert_eq!(
            render_ok(r#"{{ add(a=atoi(s="2"), b=3) }} {{ sub(a=5, b=2) }} {{ mul(a=2, b=3) }} {{ div(a=7, b=2) }} {{ mod(a=7, b=2) }}"#, &[]),
            "5 3 6 3 1",
        );
        assert!(render(r#"{{ div(a=1, b=0) }}"#, &[]).is_err());
        assert_eq!(render_ok(r#"{% if parseBool(s="T") %}y{% endif %}"#, &[]), "y");
        assert!(render(r#"{{ parseBool(s="maybe") }}"#, &[]).is_err());
    }

    #[test]
    fn seq_is_inclusive_and_ascending() {
        assert_eq!(render_ok(r#"{{ seq(first=3, last=5) | join(sep=",") }}"#, &[]), "3,4,5");
        assert_eq!(render_ok(r#"{{ seq(first=5, last=3) | length }}"#, &[]), "0");
    }

    #[test]
    fn reverse_twice_is_identity() {
        assert_eq!(
            render_ok(r#"{{ reverse(values=["a", "b", "c"]) | join(sep="") }}"#, &[]),
            "cba",
        );
        assert_eq!(
            render_ok(
                r#"{{ reverse(values=reverse(values=["a", "b", "c"])) | join(sep="") }}"#,
                &[],
            ),
            "abc",
        );
    }

    #[test]
    fn reverse_handles_kv_pairs() {
        let out = render_ok(
            r#"{% for pair in reverse(values=gets(pattern="/up/*")) %}{{ pair.key }},{% endfor %}"#,
            &[("/up/a", "1"), ("/up/b", "2")],
        );
        assert_eq!(out, "/up/b,/up/a,");
    }

    #[test]
    fn sorts_by_length_ascending() {
        assert_eq!(
            render_ok(
                r#"{{ sortByLength(values=["ccc", "a", "bb"]) | join(sep=",") }}"#,
                &[],
            ),
            "a,bb,ccc",
        );
        let out = render_ok(
            r#"{% for pair in sortKVByLength(values=gets(pattern="/*")) %}{{ pair.key }},{% endfor %}"#,
            &[("/long-key", "1"), ("/a", "2")],
        );
        assert_eq!(out, "/a,/long-key,");
    }

    #[test]
    fn base64_roundtrips_utf8() {
        assert_eq!(
            render_ok(
                r#"{{ base64Decode(data=base64Encode(data="héllo wörld")) }}"#,
                &[],
            ),
            "héllo wörld",
        );
        assert!(render(r#"{{ base64Decode(data="%%%") }}"#, &[]).is_err());
    }

    #[test]
    fn json_object_and_array_parse() {
        assert_eq!(
            render_ok(r#"{% set doc = json(data='{"a": {"b": 2}}') %}{{ doc.a.b }}"#, &[]),
            "2",
        );
        assert_eq!(
            render_ok(r#"{{ jsonArray(data='[1, 2, 3]') | length }}"#, &[]),
            "3",
        );
        assert!(render(r#"{{ json(data='[1]') }}"#, &[]).is_err());
        assert!(render(r#"{{ jsonArray(data='{}') }}"#, &[]).is_err());
    }

    #[test]
    fn map_builds_objects_and_rejects_odd_input() {
        assert_eq!(
            render_ok(r#"{% set m = map(values=["k", 1, "j", 2]) %}{{ m.k }}{{ m.j }}"#, &[]),
            "12",
        );
        assert!(render(r#"{{ map(values=["k"]) }}"#, &[]).is_err());
        assert!(render(r#"{{ map(values=[1, 2]) }}"#, &[]).is_err());
    }

    #[test]
    fn getenv_falls_back_to_default() {
        std::env::set_var("CONFSYNC_RENDER_TEST", "from-env");
        assert_eq!(
            render_ok(r#"{{ getenv(key="CONFSYNC_RENDER_TEST") }}"#, &[]),
            "from-env",
        );
        assert_eq!(
            render_ok(r#"{{ getenv(key="CONFSYNC_RENDER_UNSET", default="dflt") }}"#, &[]),
            "dflt",
        );
        assert_eq!(render_ok(r#"{{ getenv(key="CONFSYNC_RENDER_UNSET") }}"#, &[]), "");
    }

    #[test]
    fn datetime_renders_an_rfc3339_timestamp() {
        let out = render_ok(r#"{{ datetime() }}"#, &[]);
        assert!(out.contains('T'), "expected RFC 3339 timestamp, got {out}");
    }

    #[test]
    fn file_exists_checks_the_filesystem() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let template = format!(
            r#"{{{{ fileExists(path="{}") }}}}|{{{{ fileExists(path="/no/such/file") }}}}"#,
            file.path().display()
        );
        assert_eq!(render_ok(&template, &[]), "true|false");
    }

    #[test]
    fn lookup_ip_failure_is_empty_not_fatal() {
        assert_eq!(
            render_ok(r#"{{ lookupIP(host="host.invalid.") | length }}"#, &[]),
            "0",
        );
    }

    // ─── Crypto variants ───────────────────────────────────────────────────

    #[test]
    fn crypt_functions_absent_without_a_key() {
        let err = render(r#"{{ cgetv(key="/db/pw") }}"#, &[("/db/pw", "x")])
            .expect_err("cgetv must not be registered");
        assert!(
            error_chain(&err).contains("cgetv"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn crypt_decode_failure_fails_the_render() {
        let mut config = Config::default();
        config.pgp_private_key = Some(b"not a real key".to_vec());
        let engine = engine_with(&[("/db/pw", "bm90LXBncA==")], &config);
        assert!(engine.crypt_enabled());

        let err = engine
            .render_str("test", r#"{{ cgetv(key="/db/pw") }}"#)
            .expect_err("garbage key cannot decrypt");
        assert!(
            error_chain(&err).contains("secret value"),
            "unexpected error: {err}"
        );
    }

    // ─── Engine plumbing ───────────────────────────────────────────────────

    #[test]
    fn render_file_reads_from_disk() {
        let dir = tempfile::TempDir::new().expect("dir");
        let path = dir.path().join("port.tmpl");
        std::fs::write(&path, "port={{ getv(key=\"/port\") }}\n").expect("write");

        let engine = engine_with(&[("/port", "8080")], &Config::default());
        assert_eq!(engine.render_file(&path).expect("render"), "port=8080\n");
    }

    #[test]
    fn render_file_missing_template_is_io_error() {
        let engine = engine_with(&[], &Config::default());
        let err = engine
            .render_file(Path::new("/no/such/template.tmpl"))
            .expect_err("missing template");
        assert!(matches!(err, RenderError::Io { .. }));
    }

    #[test]
    fn render_command_substitutes_the_stage_path() {
        let out = TemplateEngine::render_command("check -c {{ src }}", Path::new("/tmp/.cfg123"))
            .expect("render");
        assert_eq!(out, "check -c /tmp/.cfg123");
    }

    #[test]
    fn user_functions_and_updaters_extend_the_environment() {
        let config = Config::default()
            .with_func(
                "shout",
                |args: &HashMap<String, Value>| -> tera::Result<Value> {
                    let s = args
                        .get("s")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_uppercase();
                    Ok(Value::String(s))
                },
            )
            .with_func_map_updater(|tera| {
                tera.register_function(
                    "answer",
                    |_: &HashMap<String, Value>| -> tera::Result<Value> { Ok(Value::from(42)) },
                );
            });

        let engine = engine_with(&[], &config);
        assert_eq!(
            engine
                .render_str("test", r#"{{ shout(s="hi") }} {{ answer() }}"#)
                .expect("render"),
            "HI 42",
        );
    }

    #[test]
    fn undeclared_variables_fail_the_render() {
        assert!(render("{{ not_defined }}", &[]).is_err());
    }
}
