mod emitter;
mod optimize;
