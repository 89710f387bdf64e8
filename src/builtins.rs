/// Node.js builtin module names, sorted for binary search.
///
/// A bare specifier naming one of these resolves to a null module unless an
/// earlier strategy (haste, installed package) provided a polyfill for it.
pub const NODE_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "zlib",
];

pub fn is_builtin(specifier: &str) -> bool {
    NODE_BUILTINS.binary_search(&specifier).is_ok()
}

#[test]
fn sorted() {
    let mut sorted = NODE_BUILTINS.to_vec();
    sorted.sort_unstable();
    assert_eq!(sorted, NODE_BUILTINS);
    assert!(is_builtin("fs"));
    assert!(!is_builtin("left-pad"));
}
