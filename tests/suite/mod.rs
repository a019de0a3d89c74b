mod combine;
mod concurrency;
mod gemini;
mod rate_limit;
mod sessions;
