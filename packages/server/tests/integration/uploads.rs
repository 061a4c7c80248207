use ::common::Fingerprint;
use ::common::api::paths;

use crate::common::{ChunkForm, MAX_CHUNK_SIZE, TestApp, pattern};

const CHUNK: usize = 1000;

mod listing {
    use super::*;

    #[tokio::test]
    async fn unknown_fingerprint_lists_nothing() {
        let app = TestApp::spawn().await;
        let fp = Fingerprint::compute(b"never uploaded");

        let res = app.uploaded_chunks(&fp).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["success"], true);
        assert!(res.chunk_ids().is_empty());
    }

    #[tokio::test]
    async fn malformed_fingerprint_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.get(&paths::uploaded_chunks("not-a-hash")).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["success"], false);
        assert!(res.body["data"].is_null());
    }

    #[tokio::test]
    async fn lists_stored_chunks_in_index_order() {
        let app = TestApp::spawn().await;
        let source = pattern(CHUNK * 11 + 5);

        let fp = app
            .upload_slices(&source, CHUNK, &[10, 2, 0, 11], "data.bin")
            .await;

        let res = app.uploaded_chunks(&fp).await;
        assert_eq!(
            res.chunk_ids(),
            vec![
                format!("{fp}-0"),
                format!("{fp}-2"),
                format!("{fp}-10"),
                format!("{fp}-11"),
            ]
        );
    }
}

mod chunk_upload {
    use super::*;

    #[tokio::test]
    async fn reupload_is_idempotent() {
        let app = TestApp::spawn().await;
        let source = pattern(CHUNK * 2);
        let fp = Fingerprint::compute(&source);

        for _ in 0..2 {
            let res = app
                .upload_chunk(ChunkForm {
                    fingerprint: &fp,
                    index: 0,
                    total_chunks: 2,
                    filename: "data.bin",
                    data: source[..CHUNK].to_vec(),
                })
                .await;
            assert_eq!(res.status, 200, "{}", res.text);
            assert_eq!(res.body["data"], true);
        }

        assert_eq!(app.uploaded_chunks(&fp).await.chunk_ids(), vec![format!("{fp}-0")]);
        let stored = std::fs::read(app.chunk_dir(&fp).join(format!("{fp}-0"))).unwrap();
        assert_eq!(stored, &source[..CHUNK]);
    }

    #[tokio::test]
    async fn missing_fingerprint_is_rejected() {
        let app = TestApp::spawn().await;
        let form = reqwest::multipart::Form::new()
            .text("chunk_id", "x-0")
            .text("chunk_index", "0")
            .part("file", reqwest::multipart::Part::bytes(vec![1, 2, 3]));

        let res = app.post_form(form).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["success"], false);
        assert!(
            res.body["msg"].as_str().unwrap().contains("fingerprint"),
            "unexpected message: {}",
            res.text
        );
    }

    #[tokio::test]
    async fn missing_file_is_rejected() {
        let app = TestApp::spawn().await;
        let fp = Fingerprint::compute(b"abc");
        let form = reqwest::multipart::Form::new()
            .text("fingerprint", fp.to_hex())
            .text("chunk_id", format!("{fp}-0"))
            .text("chunk_index", "0")
            .text("total_chunks", "1")
            .text("filename", "abc.txt");

        let res = app.post_form(form).await;

        assert_eq!(res.status, 400);
        assert!(res.body["msg"].as_str().unwrap().contains("file"));
        assert!(!app.chunk_dir(&fp).exists());
    }

    #[tokio::test]
    async fn chunk_id_must_match_fingerprint_and_index() {
        let app = TestApp::spawn().await;
        let fp = Fingerprint::compute(b"abc");
        let form = reqwest::multipart::Form::new()
            .text("fingerprint", fp.to_hex())
            .text("chunk_id", format!("{fp}-1"))
            .text("chunk_index", "0")
            .text("total_chunks", "2")
            .text("filename", "abc.txt")
            .part("file", reqwest::multipart::Part::bytes(b"abc".to_vec()));

        let res = app.post_form(form).await;

        assert_eq!(res.status, 400, "{}", res.text);
        assert!(app.uploaded_chunks(&fp).await.chunk_ids().is_empty());
    }

    #[tokio::test]
    async fn index_beyond_total_is_rejected() {
        let app = TestApp::spawn().await;
        let fp = Fingerprint::compute(b"abc");

        let res = app
            .upload_chunk(ChunkForm {
                fingerprint: &fp,
                index: 3,
                total_chunks: 3,
                filename: "abc.txt",
                data: b"abc".to_vec(),
            })
            .await;

        assert_eq!(res.status, 400, "{}", res.text);
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected() {
        let app = TestApp::spawn().await;
        let fp = Fingerprint::compute(b"big");

        let res = app
            .upload_chunk(ChunkForm {
                fingerprint: &fp,
                index: 0,
                total_chunks: 1,
                filename: "big.bin",
                data: vec![0u8; MAX_CHUNK_SIZE as usize + 1],
            })
            .await;

        assert_eq!(res.status, 400, "{}", res.text);
        assert!(res.body["msg"].as_str().unwrap().contains("exceeds maximum size"));
        assert!(app.uploaded_chunks(&fp).await.chunk_ids().is_empty());
    }

    #[tokio::test]
    async fn chunk_beyond_body_limit_reports_size() {
        let app = TestApp::spawn().await;
        let fp = Fingerprint::compute(b"huge");

        // Larger than the request body limit, not only the chunk limit.
        let res = app
            .upload_chunk(ChunkForm {
                fingerprint: &fp,
                index: 0,
                total_chunks: 1,
                filename: "huge.bin",
                data: vec![0u8; MAX_CHUNK_SIZE as usize * 2],
            })
            .await;

        assert_eq!(res.status, 400, "{}", res.text);
        assert_eq!(res.body["success"], false);
        assert!(
            res.body["msg"]
                .as_str()
                .unwrap()
                .contains("exceeds maximum size"),
            "{}",
            res.text
        );
        assert!(app.uploaded_chunks(&fp).await.chunk_ids().is_empty());
    }
}

mod merge {
    use super::*;

    #[tokio::test]
    async fn out_of_order_upload_merges_byte_identical() {
        let app = TestApp::spawn().await;
        let source = pattern(CHUNK * 4 + 321);

        let fp = app
            .upload_slices(&source, CHUNK, &[3, 1, 4, 0, 2], "movie.mp4")
            .await;
        let res = app.merge(&fp, "movie.mp4").await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["success"], true);
        assert_eq!(res.body["data"]["size"], source.len() as u64);

        let merged = app.root().join("merged").join(format!("{fp}-movie.mp4"));
        assert_eq!(std::fs::read(&merged).unwrap(), source);
        assert_eq!(
            res.body["data"]["file_path"].as_str().unwrap(),
            merged.display().to_string()
        );
        assert!(!app.chunk_dir(&fp).exists());
        assert!(app.uploaded_chunks(&fp).await.chunk_ids().is_empty());
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_not_found() {
        let app = TestApp::spawn().await;
        let fp = Fingerprint::compute(b"nothing here");

        let res = app.merge(&fp, "ghost.txt").await;

        assert_eq!(res.status, 404);
        assert_eq!(res.body["success"], false);
        assert!(res.body["msg"].as_str().unwrap().contains("no chunk data"));
    }

    #[tokio::test]
    async fn incomplete_set_is_refused_then_resumed() {
        let app = TestApp::spawn().await;
        let source = pattern(CHUNK * 3);

        let fp = app.upload_slices(&source, CHUNK, &[0, 2], "doc.pdf").await;
        let res = app.merge(&fp, "doc.pdf").await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["success"], false, "{}", res.text);
        let merged = app.root().join("merged").join(format!("{fp}-doc.pdf"));
        assert!(!merged.exists());
        assert_eq!(app.uploaded_chunks(&fp).await.chunk_ids().len(), 2);

        app.upload_slices(&source, CHUNK, &[1], "doc.pdf").await;
        let res = app.merge(&fp, "doc.pdf").await;

        assert_eq!(res.body["success"], true, "{}", res.text);
        assert_eq!(std::fs::read(&merged).unwrap(), source);
    }

    #[tokio::test]
    async fn corrupted_chunks_are_discarded() {
        let app = TestApp::spawn().await;
        let source = pattern(CHUNK * 2);
        let fp = Fingerprint::compute(&source);

        for index in 0..2u64 {
            let res = app
                .upload_chunk(ChunkForm {
                    fingerprint: &fp,
                    index,
                    total_chunks: 2,
                    filename: "data.bin",
                    data: vec![index as u8; CHUNK],
                })
                .await;
            assert_eq!(res.status, 200, "{}", res.text);
        }

        let res = app.merge(&fp, "data.bin").await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["success"], false);
        assert!(!app.root().join("merged").join(format!("{fp}-data.bin")).exists());
        assert!(app.uploaded_chunks(&fp).await.chunk_ids().is_empty());
    }

    #[tokio::test]
    async fn path_like_filename_is_rejected() {
        let app = TestApp::spawn().await;
        let source = pattern(CHUNK);
        let fp = app.upload_slices(&source, CHUNK, &[0], "ok.txt").await;

        let res = app.merge(&fp, "../escape.txt").await;

        assert_eq!(res.status, 400);
        assert_eq!(app.uploaded_chunks(&fp).await.chunk_ids().len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_renders_envelope() {
        let app = TestApp::spawn().await;

        let res = app
            .post_json(paths::MERGE, &serde_json::json!({ "fingerprint": 42 }))
            .await;

        assert_eq!(res.status, 400, "{}", res.text);
        assert_eq!(res.body["success"], false);
        assert!(res.body["data"].is_null());
    }

    #[tokio::test]
    async fn missing_fingerprint_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app
            .post_json(paths::MERGE, &serde_json::json!({ "filename": "a.txt" }))
            .await;

        assert_eq!(res.status, 400);
        assert!(res.body["msg"].as_str().unwrap().contains("fingerprint"));
    }
}

mod misc {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok() {
        let app = TestApp::spawn().await;

        let res = app.get(paths::HEALTH).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["data"], "ok");
    }

    #[tokio::test]
    async fn openapi_document_lists_upload_routes() {
        let app = TestApp::spawn().await;

        let res = app.get("/api-docs/openapi.json").await;

        assert_eq!(res.status, 200);
        let paths = res.body["paths"].as_object().expect("paths object");
        assert!(paths.contains_key("/api/v1/uploads/chunks"));
        assert!(paths.contains_key("/api/v1/uploads/merge"));
        assert!(paths.contains_key("/api/v1/uploads/{fingerprint}/chunks"));
    }
}
