pub const IMAGE_ASPECT_RATIO: &str = "16:9";

pub const IMAGE_STYLE_SUFFIX: &str = "Cinematic lighting, photorealistic, 8k, highly detailed.";

pub const CHAT_SYSTEM_INSTRUCTION: &str = "You are a specialized creative assistant for a storyboard artist. \
Help the user refine their script, suggest visual improvements for scenes, and discuss cinematography. \
Keep responses concise and helpful.";

pub const CHAT_GREETING: &str = "Hello! I can help you refine your storyboard, suggest camera angles, \
or brainstorm ideas. What are you working on?";

pub fn analysis_prompt(script: &str) -> String {
    format!(
        "Analyze the following movie script or text. Break it down into key visual scenes for a storyboard.\n\
        For each scene, provide:\n\
        1. A detailed \"visualDescription\" optimized for an image generation model \
        (include lighting, camera angle, subject details, background).\n\
        2. A \"caption\" describing the plot point.\n\
        3. A \"shotType\" (e.g., Close-up, Wide shot, Over-the-shoulder).\n\
        \n\
        Return the result as a JSON object with a \"scenes\" array.\n\
        \n\
        Script:\n{}",
        script
    )
}

pub fn image_prompt(visual_description: &str, shot_type: &str) -> String {
    format!(
        "{}. Shot type: {}. {}",
        visual_description.trim_end_matches('.'),
        shot_type,
        IMAGE_STYLE_SUFFIX
    )
}
