//! Render → diff → apply properties and the wire payloads the client
//! depends on.

use lvt::compile::CompiledTemplate;
use lvt::diff::diff;
use lvt::render::render;
use lvt::tree::{apply_patch, encode_full, encode_patch};
use serde_json::json;

const COUNTER: &str = "<p>Count: {{.N}}</p>";
const TOGGLE: &str = "<div>{{if .Show}}<b>{{.Msg}}</b>{{end}}</div>";
const LIST: &str = "<ul>{{range .Items}}<li data-key=\"{{.ID}}\">{{.Name}}</li>{{end}}</ul>";
const KITCHEN_SINK: &str = "<main><h1>{{.Title}}</h1>\
{{with .User}}<p>{{.Name}}</p>{{end}}\
{{if .Admin}}<a>admin</a>{{else}}<a>guest</a>{{end}}\
<ul>{{range .Rows}}<li data-key=\"{{.K}}\">{{.V}}{{if .Hot}}!{{end}}</li>{{end}}</ul></main>";

fn sink_data(admin: bool, rows: &[(&str, &str, bool)]) -> serde_json::Value {
    json!({
        "Title": "t",
        "User": { "Name": "alice" },
        "Admin": admin,
        "Rows": rows
            .iter()
            .map(|(k, v, hot)| json!({ "K": k, "V": v, "Hot": hot }))
            .collect::<Vec<_>>(),
    })
}

#[test]
fn statics_are_stable_across_data() {
    let tmpl = CompiledTemplate::compile(KITCHEN_SINK).unwrap();
    let r1 = render(&tmpl, &sink_data(false, &[("a", "1", false)]));
    let r2 = render(&tmpl, &sink_data(true, &[("b", "2", true), ("c", "3", false)]));
    assert_eq!(r1.statics, r2.statics);
}

#[test]
fn diff_apply_round_trips() {
    let tmpl = CompiledTemplate::compile(KITCHEN_SINK).unwrap();
    let sequence = [
        sink_data(false, &[("a", "1", false), ("b", "2", false)]),
        sink_data(true, &[("b", "2", true), ("a", "1", false)]),
        sink_data(true, &[("c", "9", false)]),
        sink_data(false, &[]),
        sink_data(false, &[("a", "1", false), ("b", "2", false)]),
    ];
    let mut prev = render(&tmpl, &sequence[0]);
    for data in &sequence[1..] {
        let next = render(&tmpl, data);
        let patch = diff(&prev, &next).patch;
        assert_eq!(apply_patch(&prev, &patch).unwrap(), next);
        prev = next;
    }
}

#[test]
fn diff_of_identical_renders_is_empty() {
    let tmpl = CompiledTemplate::compile(KITCHEN_SINK).unwrap();
    let tree = render(&tmpl, &sink_data(true, &[("a", "1", true)]));
    let diff = diff(&tree, &tree);
    assert!(diff.is_empty());
    assert!(diff.affected.is_empty());
    assert_eq!(encode_patch(&diff.patch), json!({}));
}

#[test]
fn permutation_produces_only_moves() {
    let tmpl = CompiledTemplate::compile(LIST).unwrap();
    let before = json!({ "Items": [
        { "ID": "A", "Name": "a" }, { "ID": "B", "Name": "b" },
        { "ID": "C", "Name": "c" }, { "ID": "D", "Name": "d" },
    ]});
    let after = json!({ "Items": [
        { "ID": "D", "Name": "d" }, { "ID": "B", "Name": "b" },
        { "ID": "A", "Name": "a" }, { "ID": "C", "Name": "c" },
    ]});
    let r1 = render(&tmpl, &before);
    let r2 = render(&tmpl, &after);
    let patch = diff(&r1, &r2).patch;

    let encoded = encode_patch(&patch);
    let ops = encoded["0"].as_array().expect("range edit script");
    assert!(ops.iter().all(|op| op["op"] == "move"), "got {ops:?}");
    assert_eq!(apply_patch(&r1, &patch).unwrap(), r2);
}

#[test]
fn fragment_ids_are_deterministic() {
    let a = CompiledTemplate::compile(KITCHEN_SINK).unwrap();
    let b = CompiledTemplate::compile(KITCHEN_SINK).unwrap();
    let ids_a: Vec<&str> = a.fragment_ids().collect();
    let ids_b: Vec<&str> = b.fragment_ids().collect();
    assert_eq!(ids_a, ids_b);
    assert_eq!(ids_a[0], "root");
}

// Scenario: simple counter.
#[test]
fn counter_wire_payloads() {
    let tmpl = CompiledTemplate::compile(COUNTER).unwrap();
    let r0 = render(&tmpl, &json!({ "N": 0 }));
    assert_eq!(
        encode_full(&r0),
        json!({ "s": ["<p>Count: ", "</p>"], "0": "0" })
    );

    let r1 = render(&tmpl, &json!({ "N": 1 }));
    assert_eq!(encode_patch(&diff(&r0, &r1).patch), json!({ "0": "1" }));
}

// Scenario: conditional appearance.
#[test]
fn conditional_wire_payloads() {
    let tmpl = CompiledTemplate::compile(TOGGLE).unwrap();
    let off = render(&tmpl, &json!({ "Show": false }));
    assert_eq!(
        encode_full(&off),
        json!({ "s": ["<div>", "</div>"], "0": "" })
    );

    let on = render(&tmpl, &json!({ "Show": true, "Msg": "hi" }));
    assert_eq!(
        encode_patch(&diff(&off, &on).patch),
        json!({ "0": { "s": ["<b>", "</b>"], "0": "hi" } })
    );

    // Dropping the branch goes back to the empty string.
    assert_eq!(encode_patch(&diff(&on, &off).patch), json!({ "0": "" }));
}

// Scenario: keyed list reorder; a single move suffices.
#[test]
fn keyed_reorder_wire_payload() {
    let tmpl = CompiledTemplate::compile(LIST).unwrap();
    let before = json!({ "Items": [
        { "ID": "A", "Name": "a" }, { "ID": "B", "Name": "b" }, { "ID": "C", "Name": "c" },
    ]});
    let after = json!({ "Items": [
        { "ID": "C", "Name": "c" }, { "ID": "A", "Name": "a" }, { "ID": "B", "Name": "b" },
    ]});
    let r1 = render(&tmpl, &before);
    let r2 = render(&tmpl, &after);
    assert_eq!(
        encode_patch(&diff(&r1, &r2).patch),
        json!({ "0": [ { "op": "move", "k": "C", "to": 0 } ] })
    );
}

#[test]
fn initial_html_matches_tree() {
    let tmpl = CompiledTemplate::compile(LIST).unwrap();
    let tree = render(
        &tmpl,
        &json!({ "Items": [ { "ID": "A", "Name": "<x>" } ] }),
    );
    assert_eq!(
        tree.to_html(),
        "<ul><li data-key=\"A\">&lt;x&gt;</li></ul>"
    );
}

// Fragment IDs live on the HTML host elements, never in the wire statics:
// the serialised tree stays byte-identical to the patch format the client
// caches, while the served page carries a data-lvt-id per nested fragment.
#[test]
fn fragment_ids_tag_html_but_not_wire_statics() {
    let tmpl = CompiledTemplate::compile(TOGGLE).unwrap();
    let on = render(&tmpl, &json!({ "Show": true, "Msg": "hi" }));

    assert_eq!(
        on.to_html(),
        "<div><b data-lvt-id=\"root.0\">hi</b></div>"
    );
    assert_eq!(
        encode_full(&on),
        json!({ "s": ["<div>", "</div>"], "0": { "s": ["<b>", "</b>"], "0": "hi" } })
    );
}
