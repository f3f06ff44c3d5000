//! Protocol layer tests: envelopes, versions, errors, context, method names.

#[cfg(test)]
mod tests {
    use ccrpc_protocol::context::local_timestamp;
    use ccrpc_protocol::methods::*;
    use ccrpc_protocol::*;
    use serde_json::{Value, json};

    // ─────────────────────────────────────────────────────────────────────
    // ProtocolVersion
    // ─────────────────────────────────────────────────────────────────────

    fn detect(value: Value) -> Result<ProtocolVersion, RpcError> {
        ProtocolVersion::detect(value.as_object().unwrap())
    }

    #[test]
    fn version_defaults_to_1_0() {
        assert_eq!(detect(json!({"method": "a.b"})).unwrap(), ProtocolVersion::V1_0);
    }

    #[test]
    fn version_markers() {
        assert_eq!(detect(json!({"version": "1.1"})).unwrap(), ProtocolVersion::V1_1);
        assert_eq!(detect(json!({"version": "2.0"})).unwrap(), ProtocolVersion::V2_0);
        assert_eq!(detect(json!({"jsonrpc": "2.0"})).unwrap(), ProtocolVersion::V2_0);
    }

    #[test]
    fn unknown_version_is_invalid_request() {
        let err = detect(json!({"version": "3.0"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        let err = detect(json!({"jsonrpc": "1.0"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn named_params_need_1_1() {
        assert!(!ProtocolVersion::V1_0.supports_named_params());
        assert!(ProtocolVersion::V1_1.supports_named_params());
        assert!(ProtocolVersion::V2_0.supports_named_params());
    }

    // ─────────────────────────────────────────────────────────────────────
    // RequestEnvelope / Incoming
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn parse_positional_request() {
        let env = RequestEnvelope::from_value(json!({
            "method": "svc.count",
            "params": ["ws1", "obj1"],
            "id": "1",
            "version": "1.1"
        }))
        .unwrap();
        assert_eq!(env.method, "svc.count");
        assert_eq!(env.params, Params::Positional(vec![json!("ws1"), json!("obj1")]));
        assert_eq!(env.id, Some(json!("1")));
        assert_eq!(env.version, ProtocolVersion::V1_1);
        assert!(!env.is_notification());
    }

    #[test]
    fn null_id_is_notification() {
        let env = RequestEnvelope::from_value(json!({"method": "a.b", "id": null})).unwrap();
        assert!(env.is_notification());
        let env = RequestEnvelope::from_value(json!({"method": "a.b"})).unwrap();
        assert!(env.is_notification());
    }

    #[test]
    fn missing_params_is_none() {
        let env = RequestEnvelope::from_value(json!({"method": "a.b", "id": 1})).unwrap();
        assert_eq!(env.params, Params::None);
        assert_eq!(env.params.to_value(), json!([]));
    }

    #[test]
    fn named_params_parse() {
        let env = RequestEnvelope::from_value(json!({
            "method": "a.b", "params": {"x": 1}, "id": 1, "jsonrpc": "2.0"
        }))
        .unwrap();
        assert!(matches!(env.params, Params::Named(ref map) if map["x"] == json!(1)));
    }

    #[test]
    fn malformed_requests_rejected() {
        for bad in [
            json!({}),
            json!({"params": []}),
            json!({"method": 5}),
            json!({"method": ""}),
            json!({"method": "a.b", "params": "nope"}),
            json!("just a string"),
        ] {
            let err = RequestEnvelope::from_value(bad.clone()).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidRequest, "{bad}");
        }
    }

    #[test]
    fn context_member_is_kept() {
        let env = RequestEnvelope::from_value(json!({
            "method": "a.b", "id": 1, "context": {"call_stack": []}
        }))
        .unwrap();
        assert_eq!(env.context, Some(json!({"call_stack": []})));
    }

    #[test]
    fn incoming_single_and_batch() {
        let single = Incoming::parse(json!({"method": "a.b", "id": 1})).unwrap();
        assert!(matches!(single, Incoming::Single(_)));

        let batch = Incoming::parse(json!([
            {"method": "a.b", "id": 1},
            {"method": "a.c"}
        ]))
        .unwrap();
        match batch {
            Incoming::Batch(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[1].method, "a.c");
                assert!(entries[1].is_notification());
            }
            Incoming::Single(_) => panic!("expected batch"),
        }
    }

    #[test]
    fn batch_fails_fast_on_malformed_entry() {
        let err = Incoming::parse(json!([
            {"method": "a.b", "id": 1},
            {"id": 2}
        ]))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(err.code, -32600);
    }

    #[test]
    fn empty_batch_is_invalid() {
        let err = Incoming::parse(json!([])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        let err = Incoming::parse(json!(42)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    // ─────────────────────────────────────────────────────────────────────
    // ResponseEnvelope
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn success_response_wire_form() {
        let resp = ResponseEnvelope::success(
            ProtocolVersion::V1_1,
            Some(json!("1")),
            json!([{"contig_count": 1}]),
        );
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"version":"1.1","result":[{"contig_count":1}],"id":"1"}"#
        );
    }

    #[test]
    fn parse_error_wire_form() {
        let err = RpcError::parse_error("expected value at line 1 column 1");
        let resp = ResponseEnvelope::error(ProtocolVersion::V1_1, None, &err);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({
                "version": "1.1",
                "error": {
                    "code": -32700,
                    "name": "Parse error",
                    "message": "expected value at line 1 column 1"
                },
                "id": null
            })
        );
    }

    #[test]
    fn v2_response_uses_jsonrpc_marker() {
        let resp = ResponseEnvelope::success(ProtocolVersion::V2_0, Some(json!(7)), json!(true));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert!(value.get("version").is_none());
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn trace_only_under_legacy_framing() {
        let err = RpcError::server_error("boom").with_trace("Traceback: line 1\nline 2");

        let legacy = ResponseEnvelope::error(ProtocolVersion::V1_1, Some(json!(1)), &err);
        let value = serde_json::to_value(&legacy).unwrap();
        assert_eq!(value["error"]["error"], "Traceback: line 1\nline 2");
        assert_eq!(value["error"]["message"], "boom");
        assert_eq!(value["error"]["code"], -32000);

        let strict = ResponseEnvelope::error(ProtocolVersion::V2_0, Some(json!(1)), &err);
        let value = serde_json::to_value(&strict).unwrap();
        assert!(value["error"].get("error").is_none());
        assert_eq!(value["error"]["message"], "boom");
    }

    #[test]
    fn decode_never_yields_both() {
        let resp = ResponseEnvelope::from_outcome(
            ProtocolVersion::V1_1,
            Some(json!("9")),
            Err(RpcError::invalid_params("too many arguments")),
        );
        let text = serde_json::to_string(&resp).unwrap();
        let decoded: ResponseEnvelope = serde_json::from_str(&text).unwrap();
        assert!(decoded.is_error());
        assert!(decoded.result().is_none());
        assert_eq!(decoded.error_object().unwrap().code, -32602);
        assert_eq!(decoded.id, Some(json!("9")));

        let both = json!({"version": "1.1", "result": 1, "error": {"code": 0}, "id": 1});
        assert!(serde_json::from_value::<ResponseEnvelope>(both).is_err());
        let neither = json!({"version": "1.1", "id": 1});
        assert!(serde_json::from_value::<ResponseEnvelope>(neither).is_err());
    }

    #[test]
    fn null_result_is_a_result() {
        let decoded: ResponseEnvelope =
            serde_json::from_value(json!({"version": "1.1", "result": null, "id": 1})).unwrap();
        assert_eq!(decoded.result(), Some(&Value::Null));
    }

    #[test]
    fn legacy_error_with_null_result() {
        let decoded: ResponseEnvelope = serde_json::from_value(json!({
            "result": null,
            "error": {"code": -32601, "name": "Method not found", "message": "nope"},
            "id": 1
        }))
        .unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.version, ProtocolVersion::V1_1);
        assert_eq!(decoded.error_object().unwrap().message, "nope");

        let with_null_error: ResponseEnvelope =
            serde_json::from_value(json!({"result": [1], "error": null, "id": 1})).unwrap();
        assert_eq!(with_null_error.result(), Some(&json!([1])));
    }

    #[test]
    fn reply_status_classification() {
        let ok = ResponseEnvelope::success(ProtocolVersion::V1_1, Some(json!(1)), json!(1));
        let bad =
            ResponseEnvelope::error(ProtocolVersion::V1_1, Some(json!(2)), &RpcError::unexpected());
        assert!(!Reply::Single(ok.clone()).is_error());
        assert!(Reply::Single(bad.clone()).is_error());
        assert!(!Reply::Batch(vec![ok, bad]).is_error());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Errors
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn error_codes_and_names() {
        assert_eq!(ErrorKind::ParseError.code(), -32700);
        assert_eq!(ErrorKind::InvalidRequest.code(), -32600);
        assert_eq!(ErrorKind::MethodNotFound.code(), -32601);
        assert_eq!(ErrorKind::InvalidParams.code(), -32602);
        assert_eq!(ErrorKind::KeywordNotSupported.code(), -32602);
        assert_eq!(ErrorKind::Unexpected.code(), 0);
        assert_eq!(ErrorKind::Unexpected.name(), "Unexpected Server Error");
        assert_eq!(ErrorKind::AuthenticationRequired.name(), "Authentication required");
        assert!(ErrorKind::InvalidParams.is_validation());
        assert!(!ErrorKind::ServerError.is_validation());
    }

    #[test]
    fn relayed_error_keeps_remote_fields() {
        let object: ErrorObject = serde_json::from_value(json!({
            "code": -32500,
            "name": "JSONRPCError",
            "message": "job failed",
            "error": "remote trace"
        }))
        .unwrap();
        let err = RpcError::upstream(object);
        assert_eq!(err.kind, ErrorKind::UpstreamJobError);
        assert_eq!(err.code, -32500);
        assert_eq!(err.name, "JSONRPCError");
        assert_eq!(err.message, "job failed");
        assert_eq!(err.trace.as_deref(), Some("remote trace"));
    }

    #[test]
    fn error_object_tolerates_null_fields() {
        let object: ErrorObject =
            serde_json::from_value(json!({"code": 1, "name": null, "message": null})).unwrap();
        assert_eq!(object.name, "");
        assert_eq!(object.message, "");
        assert!(object.trace.is_none());
    }

    #[test]
    fn error_display() {
        let err = RpcError::method_not_found("a.missing");
        assert_eq!(err.to_string(), "Method not found [-32601]: Method not found: a.missing");
    }

    // ─────────────────────────────────────────────────────────────────────
    // RequestContext
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn context_seeded_from_envelope() {
        let env = RequestEnvelope::new(
            "svc.count",
            Params::Positional(vec![json!("ws1"), json!("obj1")]),
            Some(json!("1")),
        );
        let mut ctx = RequestContext::new("svc");
        ctx.seed_from(&env);

        assert_eq!(ctx.module.as_deref(), Some("svc"));
        assert_eq!(ctx.method.as_deref(), Some("count"));
        assert_eq!(ctx.call_id, Some(json!("1")));

        let stack = &ctx.rpc_context.as_ref().unwrap().call_stack;
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].method, "svc.count");

        assert_eq!(ctx.provenance.len(), 1);
        assert_eq!(ctx.provenance[0].service, "svc");
        assert_eq!(ctx.provenance[0].method, "count");
        assert_eq!(ctx.provenance[0].method_params, json!(["ws1", "obj1"]));
    }

    #[test]
    fn context_starts_unauthenticated() {
        let ctx = RequestContext::new("svc");
        assert!(!ctx.authenticated);
        assert!(ctx.user_id.is_none());
        assert!(ctx.token().is_none());
        assert!(!ctx.cli);
    }

    #[test]
    fn authenticate_and_redact() {
        let mut ctx = RequestContext::new("svc");
        ctx.authenticate("alice", "s3cret-token");
        assert!(ctx.authenticated);
        assert_eq!(ctx.user_id.as_deref(), Some("alice"));
        assert_eq!(ctx.token(), Some("s3cret-token"));

        let debug = format!("{ctx:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("s3cret-token"));
    }

    #[test]
    fn logging_without_subscriber_does_not_panic() {
        let ctx = RequestContext::new("svc");
        ctx.error("an error");
        ctx.info("some info");
        ctx.debug("debugging");
        ctx.debug_at(DebugLevel::DEBUG3, "very verbose");
    }

    #[test]
    fn rpc_context_keeps_unknown_members() {
        let rpc: RpcContext = serde_json::from_value(json!({
            "call_stack": [{"time": "t", "method": "a.b"}],
            "run_id": "abc"
        }))
        .unwrap();
        assert_eq!(rpc.call_stack[0].method, "a.b");
        assert_eq!(rpc.extra["run_id"], "abc");
        let back = serde_json::to_value(&rpc).unwrap();
        assert_eq!(back["run_id"], "abc");
    }

    #[test]
    fn debug_levels() {
        assert_eq!("DEBUG".parse::<DebugLevel>().unwrap(), DebugLevel::DEBUG);
        assert_eq!("DEBUG2".parse::<DebugLevel>().unwrap(), DebugLevel::DEBUG2);
        assert_eq!("3".parse::<DebugLevel>().unwrap(), DebugLevel::DEBUG3);
        assert_eq!(DebugLevel::try_from(1i64).unwrap().value(), 7);
        assert_eq!(DebugLevel::try_from(8i64).unwrap(), DebugLevel::DEBUG2);
        assert_eq!(DebugLevel::default(), DebugLevel::DEBUG);
    }

    #[test]
    fn illegal_debug_levels() {
        for bad in [0i64, 4, 6, 10, -1] {
            assert!(DebugLevel::try_from(bad).is_err(), "{bad}");
        }
        let err = "VERBOSE".parse::<DebugLevel>().unwrap_err();
        assert_eq!(err.to_string(), "Illegal log level: VERBOSE");
    }

    #[test]
    fn timestamp_is_rfc3339_with_offset() {
        let ts = local_timestamp();
        let parsed = chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
        assert!(parsed.timestamp() > 0);
        // microseconds plus ±HH:MM
        let fraction = ts.split('.').nth(1).unwrap();
        assert_eq!(fraction.len(), 6 + 6);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Method names / auth
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn split_on_first_separator() {
        assert_eq!(split_method("svc.count"), (Some("svc"), "count"));
        assert_eq!(split_method("a.b.c"), (Some("a"), "b.c"));
        assert_eq!(split_method("bare"), (None, "bare"));
    }

    #[test]
    fn pseudo_method_names() {
        assert_eq!(parse_pseudo("svc.count_async"), Some((PseudoKind::Submit, "svc.count")));
        assert_eq!(parse_pseudo("svc.count_check"), Some((PseudoKind::Check, "svc.count")));
        assert_eq!(parse_pseudo("svc.count"), None);
        assert_eq!(parse_pseudo("_async"), None);
    }

    #[test]
    fn auth_requirement_strings() {
        assert_eq!(AuthRequirement::default(), AuthRequirement::None);
        assert_eq!("required".parse::<AuthRequirement>().unwrap(), AuthRequirement::Required);
        assert_eq!(AuthRequirement::Optional.to_string(), "optional");
        assert!("sometimes".parse::<AuthRequirement>().is_err());
    }
}
