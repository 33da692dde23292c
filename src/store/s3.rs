//! S3-backed object store.
//!
//! A thin adapter over the AWS SDK client. An `endpoint_url` override
//! switches to path-style addressing so the same code runs against MinIO or
//! LocalStack during local simulation.

use std::{future::Future, pin::Pin};

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::config::Config;

use super::ObjectStore;

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn from_config(config: &Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region().to_owned()));
        if let Some(endpoint) = config.endpoint_url() {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.endpoint_url().is_some() {
            builder = builder.force_path_style(true);
        }

        Self::new(
            aws_sdk_s3::Client::from_conf(builder.build()),
            config.bucket(),
        )
    }
}

impl ObjectStore for S3ObjectStore {
    fn put(
        &self,
        key: &str,
        body: Bytes,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_owned();

        Box::pin(async move {
            client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type("application/json")
                .body(ByteStream::from(body))
                .send()
                .await?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = eyre::Result<Option<Bytes>>> + Send>> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_owned();

        Box::pin(async move {
            match client.get_object().bucket(bucket).key(key).send().await {
                Ok(output) => {
                    let body = output.body.collect().await?.into_bytes();
                    Ok(Some(body))
                }
                Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                    Ok(None)
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_owned();

        Box::pin(async move {
            client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await?;
            Ok(())
        })
    }

    fn list(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<Vec<String>>> + Send>> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let prefix = prefix.to_owned();

        Box::pin(async move {
            let mut keys = Vec::new();
            let mut pages = client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .into_paginator()
                .send();

            while let Some(page) = pages.next().await {
                let page = page?;
                for object in page.contents() {
                    if let Some(key) = object.key() {
                        keys.push(key.to_owned());
                    }
                }
            }
            Ok(keys)
        })
    }
}
