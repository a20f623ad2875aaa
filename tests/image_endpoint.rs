mod common;

use axum::http::StatusCode;
use common::{body_bytes, body_json, get, header, offline_config, router_for};

#[tokio::test]
async fn renders_png_with_requested_size() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/800x600/3b82f6/ffffff?text=Hello").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type"), "image/png");
    assert_eq!(
        header(&resp, "cache-control"),
        "public, max-age=31536000, immutable"
    );
    assert_eq!(header(&resp, "x-image-width"), "800");
    assert_eq!(header(&resp, "x-image-height"), "600");
    assert_eq!(header(&resp, "x-image-format"), "png");
    assert_eq!(header(&resp, "x-image-scale"), "1");

    let bytes = body_bytes(resp).await;
    let img = image::load_from_memory(&bytes).expect("decode png");
    assert_eq!((img.width(), img.height()), (800, 600));
    let corner = img.to_rgba8().get_pixel(0, 0).0;
    assert_eq!(corner, [0x3b, 0x82, 0xf6, 255]);
}

#[tokio::test]
async fn scale_and_extension_select_raster_and_codec() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/120@2x.jpg").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type"), "image/jpeg");
    assert_eq!(header(&resp, "x-image-width"), "120");
    assert_eq!(header(&resp, "x-image-scale"), "2");
    let img = image::load_from_memory(&body_bytes(resp).await).expect("decode jpeg");
    assert_eq!((img.width(), img.height()), (240, 240));
}

#[tokio::test]
async fn format_query_overrides_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/64x32.png?format=webp&quality=70").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type"), "image/webp");
    let bytes = body_bytes(resp).await;
    assert_eq!(&bytes[..4], b"RIFF");
}

#[tokio::test]
async fn identical_requests_are_byte_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = offline_config(dir.path());
    config.image.cache_enabled = false;
    let app = router_for(&config);

    let uri = "/200x100/ff6b6b-4ecdc4/fff?noise=30&pattern=dots&border=3&radius=12&shadow=4&blur=1";
    let a = body_bytes(get(&app, uri).await).await;
    let b = body_bytes(get(&app, uri).await).await;
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[tokio::test]
async fn percent_encoded_hash_colors_are_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/10x10/%23ff0000").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let img = image::load_from_memory(&body_bytes(resp).await).expect("decode");
    assert_eq!(img.to_rgba8().get_pixel(5, 5).0, [255, 0, 0, 255]);
}

#[tokio::test]
async fn unavailable_font_and_glyphs_still_render() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/300x100?font=lobster&text=Hi%20%F0%9F%8E%89").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = get(&app, "/300x100?font=not-a-font").await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_dimensions_return_error_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/abc").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header(&resp, "content-type"), "application/json");
    let v = body_json(resp).await;
    assert_eq!(v["error"], "Malformed Input");
    assert_eq!(v["field"], "dimensions");
    assert_eq!(v["received"], "abc");
    assert!(v["docs"].as_str().is_some_and(|d| d.ends_with("/docs")));
    assert!(v["examples"].as_array().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn oversized_dimensions_suggest_clamped_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let v = body_json(get(&app, "/5000x5000").await).await;
    assert_eq!(v["error"], "Out Of Range");
    assert_eq!(v["field"], "dimensions");
    assert_eq!(v["suggestion"], "/4000x4000");
}

#[tokio::test]
async fn unsupported_extension_names_format_field() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/800x600.gif").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = body_json(resp).await;
    assert_eq!(v["error"], "Unsupported Value");
    assert_eq!(v["field"], "format");
    assert_eq!(v["received"], "gif");
}

#[tokio::test]
async fn out_of_range_query_parameter() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let v = body_json(get(&app, "/300?blur=80").await).await;
    assert_eq!(v["field"], "blur");
    assert_eq!(v["suggestion"], "blur=50");
}

#[tokio::test]
async fn root_path_is_not_an_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn control_characters_in_text_are_not_server_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = router_for(&offline_config(dir.path()));

    let resp = get(&app, "/100x50?text=a%01b%1Fc").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-type"), "image/png");
}
